use pingora_error::{ErrorType::InternalError, OrErr, Result};
use pingora_http::RequestHeader;

use super::{SteeringDecision, FORCE_GRAY_HEADER, FORCE_GRAY_VAR};
use crate::core::ProxyContext;

/// Tags a steered request for the proxy core.
///
/// A "not gray" decision leaves both the header and the context untouched:
/// downstream, the absence of `force-gray` is the only "not gray" signal.
pub fn apply(
    header: &mut RequestHeader,
    ctx: &mut ProxyContext,
    decision: SteeringDecision,
) -> Result<()> {
    if !decision.force_gray {
        return Ok(());
    }

    header
        .insert_header(FORCE_GRAY_HEADER, "true")
        .or_err(InternalError, "Session insert force-gray header fail")?;
    ctx.set(FORCE_GRAY_VAR, "true".to_string());
    Ok(())
}

/// Whether an earlier plugin steered this request to the gray variant.
pub fn is_force_gray(ctx: &ProxyContext) -> bool {
    ctx.get_str(FORCE_GRAY_VAR) == Some("true")
}
