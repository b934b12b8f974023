//! Lifecycle state machine shared by every persistence strategy.

use super::events::SubscriptionEvent;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::listener::ListenerState;
use crate::types::{ListenerId, Timestamp};

/// Externally observable state of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    NotStarted,
    Starting,
    Running,
    Paused,
    Completed,
}

/// In-memory lifecycle fields.
///
/// Guards decide which transition an operation produces; [`apply`](Self::apply)
/// is the only place fields change.
#[derive(Clone, Debug, Default)]
pub struct Machine {
    pub started_by: Option<Envelope>,
    pub starting: bool,
    pub paused: bool,
    pub completed: bool,
    pub last_processed: Option<Envelope>,
    pub last_state: Option<ListenerState>,
}

impl Machine {
    pub fn started(&self) -> bool {
        self.started_by.is_some()
    }

    pub fn state(&self) -> State {
        if !self.started() {
            State::NotStarted
        } else if self.completed {
            State::Completed
        } else if self.paused {
            State::Paused
        } else if self.starting {
            State::Starting
        } else {
            State::Running
        }
    }

    pub fn apply(&mut self, event: &SubscriptionEvent) {
        match event {
            SubscriptionEvent::Started { by, .. } => {
                self.started_by = Some(by.clone());
                self.starting = true;
                self.paused = false;
                self.completed = false;
                self.last_processed = None;
                self.last_state = None;
            }
            SubscriptionEvent::Restarted { .. } => {
                self.starting = true;
                self.completed = false;
                self.last_processed = None;
                self.last_state = None;
            }
            SubscriptionEvent::Paused { .. } => self.paused = true,
            SubscriptionEvent::Unpaused { .. } => self.paused = false,
            SubscriptionEvent::ListenedToEvent { event, .. }
            | SubscriptionEvent::IgnoredEvent { event, .. } => {
                self.last_processed = Some(event.clone());
                self.starting = false;
            }
            SubscriptionEvent::ListenersStateChanged { state, .. } => {
                self.last_state = Some(state.clone());
            }
            SubscriptionEvent::Completed { .. } => {
                self.completed = true;
                self.starting = false;
            }
        }
    }

    // --- Guards ---

    pub fn start(&self, id: &ListenerId, by: &Envelope, at: Timestamp) -> Result<SubscriptionEvent> {
        if self.started() {
            return Err(Error::SubscriptionAlreadyStarted(id.clone()));
        }
        Ok(SubscriptionEvent::Started { by: by.clone(), at })
    }

    /// `None` when the subscription is already starting over.
    pub fn restart(
        &self,
        id: &ListenerId,
        resettable: bool,
        at: Timestamp,
    ) -> Result<Option<SubscriptionEvent>> {
        if !self.started() {
            return Err(Error::SubscriptionNotStartedYet(id.clone()));
        }
        if !resettable {
            return Err(Error::SubscriptionRestartNotPossible(id.clone()));
        }
        if self.starting {
            return Ok(None);
        }
        Ok(Some(SubscriptionEvent::Restarted { at }))
    }

    /// `None` when already paused.
    pub fn pause(&self, id: &ListenerId, at: Timestamp) -> Result<Option<SubscriptionEvent>> {
        self.ensure_active(id)?;
        if self.paused {
            return Ok(None);
        }
        Ok(Some(SubscriptionEvent::Paused { at }))
    }

    /// `None` when not paused.
    pub fn unpause(&self, id: &ListenerId, at: Timestamp) -> Result<Option<SubscriptionEvent>> {
        self.ensure_active(id)?;
        if !self.paused {
            return Ok(None);
        }
        Ok(Some(SubscriptionEvent::Unpaused { at }))
    }

    /// Preconditions of streaming, in order: started, not completed, not paused.
    pub fn ensure_can_stream(&self, id: &ListenerId) -> Result<()> {
        self.ensure_active(id)?;
        if self.paused {
            return Err(Error::SubscriptionPaused(id.clone()));
        }
        Ok(())
    }

    fn ensure_active(&self, id: &ListenerId) -> Result<()> {
        if !self.started() {
            return Err(Error::SubscriptionNotStartedYet(id.clone()));
        }
        if self.completed {
            return Err(Error::SubscriptionAlreadyCompleted(id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProducerId, Version};
    use serde_json::json;

    fn id() -> ListenerId {
        ListenerId::new("projector", "orders")
    }

    fn event() -> Envelope {
        Envelope::new("placed", ProducerId::new("order", "1"), Version(1), Timestamp(0), json!({}))
    }

    fn started() -> Machine {
        let mut machine = Machine::default();
        let started = machine.start(&id(), &event(), Timestamp(0)).unwrap();
        machine.apply(&started);
        machine
    }

    #[test]
    fn test_start_enters_starting() {
        let machine = started();
        assert_eq!(machine.state(), State::Starting);
        assert!(machine.starting && machine.started());

        let again = machine.start(&id(), &event(), Timestamp(1));
        assert!(matches!(again, Err(Error::SubscriptionAlreadyStarted(_))));
    }

    #[test]
    fn test_processing_leaves_starting() {
        let mut machine = started();
        let processed = event();
        machine.apply(&SubscriptionEvent::IgnoredEvent {
            event: processed.clone(),
            at: Timestamp(1),
        });
        assert_eq!(machine.state(), State::Running);
        assert_eq!(machine.last_processed, Some(processed));
    }

    #[test]
    fn test_restart_guards() {
        let fresh = Machine::default();
        assert!(matches!(
            fresh.restart(&id(), true, Timestamp(0)),
            Err(Error::SubscriptionNotStartedYet(_))
        ));

        let mut machine = started();
        assert!(matches!(
            machine.restart(&id(), false, Timestamp(0)),
            Err(Error::SubscriptionRestartNotPossible(_))
        ));
        assert_eq!(machine.restart(&id(), true, Timestamp(0)).unwrap(), None);

        machine.apply(&SubscriptionEvent::ListenedToEvent { event: event(), at: Timestamp(1) });
        machine.apply(&SubscriptionEvent::Completed { by: event(), at: Timestamp(1) });
        let restarted = machine.restart(&id(), true, Timestamp(2)).unwrap();
        assert!(restarted.is_some());

        machine.apply(&SubscriptionEvent::Restarted { at: Timestamp(2) });
        assert_eq!(machine.state(), State::Starting);
        assert_eq!(machine.last_processed, None);
    }

    #[test]
    fn test_pause_guards() {
        let mut machine = started();
        let paused = machine.pause(&id(), Timestamp(1)).unwrap();
        assert!(paused.is_some());
        machine.apply(&SubscriptionEvent::Paused { at: Timestamp(1) });

        assert_eq!(machine.state(), State::Paused);
        assert_eq!(machine.pause(&id(), Timestamp(2)).unwrap(), None);
        assert!(matches!(
            machine.ensure_can_stream(&id()),
            Err(Error::SubscriptionPaused(_))
        ));

        machine.apply(&SubscriptionEvent::Completed { by: event(), at: Timestamp(3) });
        assert!(matches!(
            machine.unpause(&id(), Timestamp(4)),
            Err(Error::SubscriptionAlreadyCompleted(_))
        ));
    }

    #[test]
    fn test_stream_preconditions_order() {
        let fresh = Machine::default();
        assert!(matches!(
            fresh.ensure_can_stream(&id()),
            Err(Error::SubscriptionNotStartedYet(_))
        ));

        // Completion is reported before pause.
        let mut machine = started();
        machine.apply(&SubscriptionEvent::Paused { at: Timestamp(1) });
        machine.apply(&SubscriptionEvent::Completed { by: event(), at: Timestamp(1) });
        assert!(matches!(
            machine.ensure_can_stream(&id()),
            Err(Error::SubscriptionAlreadyCompleted(_))
        ));
    }
}
