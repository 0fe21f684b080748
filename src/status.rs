use crate::subscription::SharedSubscription;

/// Upstream edge state of a single-upstream stage.
///
/// A stage starts `Awaiting`, moves to `Subscribed` when its upstream hands
/// over a subscription, and ends `Terminal` on completion or cancellation.
/// There is no way back out of `Terminal`.
#[derive(Default)]
pub(crate) enum SubscriptionStatus {
  #[default]
  Awaiting,
  Subscribed(SharedSubscription),
  Terminal,
}

impl SubscriptionStatus {
  #[inline]
  pub(crate) fn is_awaiting(&self) -> bool { matches!(self, SubscriptionStatus::Awaiting) }

  #[inline]
  pub(crate) fn is_subscribed(&self) -> bool { matches!(self, SubscriptionStatus::Subscribed(_)) }

  pub(crate) fn subscription(&self) -> Option<SharedSubscription> {
    match self {
      SubscriptionStatus::Subscribed(subscription) => Some(subscription.clone()),
      _ => None,
    }
  }

  /// Moves to `Terminal`, handing back the upstream subscription if there
  /// was one. The caller cancels it (or drops it) after releasing its lock.
  pub(crate) fn terminate(&mut self) -> Option<SharedSubscription> {
    match std::mem::replace(self, SubscriptionStatus::Terminal) {
      SubscriptionStatus::Subscribed(subscription) => Some(subscription),
      _ => None,
    }
  }
}
