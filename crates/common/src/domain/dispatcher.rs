use crate::domain::{EventContext, IntegrationEvent};
use lorix_codec::Variables;

/// Fans application events out to integrations.
///
/// Dispatch never blocks on delivery and never fails: delivery errors are the
/// dispatcher's to log.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, ctx: &EventContext, variables: &Variables, event: IntegrationEvent);
}
