//! Automaton runtime
//!
//! Every multi-step registry conversation is a [`StateMachine`] driven by
//! an [`Automaton`]. The runtime owns the current state and the outputs a
//! conversation accumulates, registers the instance in the
//! [`AutomatonRegistry`], and turns a failed transition into the `FAILED`
//! state plus an error output.
//!
//! ## Event Processing
//!
//! ```text
//! event ──► transition(state, event) ──► Ok(next, follow_up?) ──► state = next
//!              │                                  │
//!              │                                  └── follow_up? ──► loop
//!              └── Err(e) ──► outputs += e, state = FAILED
//! ```
//!
//! Follow-up events are processed in the same call, so one `event()` runs
//! a conversation until it needs no further input. Events delivered in a
//! terminal state are logged and ignored; events delivered after
//! [`Automaton::destroy`] are an error.

pub mod registry;

use std::fmt;

use async_trait::async_trait;
use tracing::{debug, error, info, trace};

use crate::config::AutomatonConfig;
use crate::error::{Error, Result};

pub use registry::{AutomatonRegistry, LiveAutomaton, StateChange};

/// State enumeration of a machine
pub trait MachineState: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Initial state of every instance
    const STARTUP: Self;
    /// State entered when a conversation fails
    const FAILED: Self;

    /// No further events are processed in this state
    fn is_terminal(&self) -> bool;
}

/// Define a machine state enum with its log labels
///
/// The enum must have `Startup` and `Failed` variants; the listed terminal
/// variants end the conversation.
macro_rules! machine_states {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $label:literal),+ $(,)?
        }
        terminal: [$($terminal:ident),+ $(,)?]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant),+
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(match self {
                    $(Self::$variant => $label),+
                })
            }
        }

        impl $crate::automaton::MachineState for $name {
            const STARTUP: Self = Self::Startup;
            const FAILED: Self = Self::Failed;

            fn is_terminal(&self) -> bool {
                matches!(self, $(Self::$terminal)|+)
            }
        }
    };
}

pub(crate) use machine_states;

/// Result of one transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<S, E> {
    pub next: S,
    /// Event to process right after entering `next`
    pub follow_up: Option<E>,
}

impl<S, E> Transition<S, E> {
    /// Move to `next` and wait for the next event
    pub fn to(next: S) -> Self {
        Self {
            next,
            follow_up: None,
        }
    }

    /// Move to `next` and immediately process `event`
    pub fn then(next: S, event: E) -> Self {
        Self {
            next,
            follow_up: Some(event),
        }
    }
}

/// A registry conversation
#[async_trait]
pub trait StateMachine: Send {
    type State: MachineState;
    type Event: fmt::Debug + Send + 'static;
    type Output: From<Error> + Send;

    /// Machine name, used for instance ids and logs
    fn name(&self) -> &'static str;

    /// Handle `event` in `state`
    ///
    /// Returning `Err` fails the conversation: the runtime records the
    /// error as an output and enters `FAILED`.
    async fn transition(
        &mut self,
        state: Self::State,
        event: Self::Event,
        outputs: &mut Vec<Self::Output>,
    ) -> Result<Transition<Self::State, Self::Event>>;
}

/// Final state and outputs of a destroyed automaton
#[derive(Debug)]
pub struct Finished<S, O> {
    pub id: String,
    pub state: S,
    pub outputs: Vec<O>,
}

impl<S: MachineState, O> Finished<S, O> {
    pub fn failed(&self) -> bool {
        self.state == S::FAILED
    }
}

/// Running instance of a [`StateMachine`]
pub struct Automaton<M: StateMachine> {
    index: u64,
    id: String,
    machine: M,
    state: M::State,
    outputs: Vec<M::Output>,
    options: AutomatonConfig,
    registry: AutomatonRegistry,
    destroyed: bool,
}

impl<M: StateMachine> fmt::Debug for Automaton<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Automaton")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("outputs", &self.outputs.len())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl<M: StateMachine> Automaton<M> {
    /// Create an instance in `STARTUP` and register it
    pub fn create(registry: &AutomatonRegistry, machine: M, options: AutomatonConfig) -> Self {
        let state = M::State::STARTUP;
        let (index, id) = registry.register(machine.name(), state.to_string());
        debug!(automaton = %id, "Automaton created");

        Self {
            index,
            id,
            machine,
            state,
            outputs: Vec::new(),
            options,
            registry: registry.clone(),
            destroyed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> M::State {
        self.state
    }

    pub fn outputs(&self) -> &[M::Output] {
        &self.outputs
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Deliver an event and process all follow-ups
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Processed, ignored in a terminal state, or failed with
    ///   `raise_errors` off
    /// - `Err(Error::Automaton)`: The instance was destroyed
    /// - `Err(e)`: The conversation failed and `raise_errors` is on
    pub async fn event(&mut self, event: M::Event) -> Result<()> {
        if self.destroyed {
            return Err(Error::automaton(format!(
                "{} received {:?} after destroy",
                self.id, event
            )));
        }

        let mut pending = Some(event);
        while let Some(event) = pending.take() {
            if self.state.is_terminal() {
                debug!(automaton = %self.id, state = %self.state, "Ignoring {:?} in terminal state", event);
                return Ok(());
            }
            if self.options.log_events {
                debug!(automaton = %self.id, state = %self.state, "Event {:?}", event);
            }

            let current = self.state;
            match self.machine.transition(current, event, &mut self.outputs).await {
                Ok(transition) => {
                    self.set_state(transition.next);
                    pending = transition.follow_up;
                }
                Err(e) => {
                    error!(automaton = %self.id, state = %current, "Conversation failed: {}", e);
                    self.outputs.push(M::Output::from(e.clone()));
                    self.set_state(M::State::FAILED);
                    if self.options.raise_errors {
                        return Err(e);
                    }
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn set_state(&mut self, next: M::State) {
        if next == self.state {
            trace!(automaton = %self.id, state = %next, "State not changed");
            return;
        }
        let old = std::mem::replace(&mut self.state, next);
        if self.options.log_transitions {
            info!(automaton = %self.id, "{} -> {}", old, next);
        }
        self.registry.notify(StateChange {
            index: self.index,
            id: self.id.clone(),
            name: self.machine.name(),
            old_state: old.to_string(),
            new_state: next.to_string(),
        });
    }

    /// Unregister the instance; later events are rejected
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if self.registry.unregister(self.index) {
            debug!(automaton = %self.id, state = %self.state, "Automaton destroyed");
        }
    }

    /// Destroy the instance and hand back its final state and outputs
    pub fn finish(mut self) -> Finished<M::State, M::Output> {
        self.destroy();
        Finished {
            id: std::mem::take(&mut self.id),
            state: self.state,
            outputs: std::mem::take(&mut self.outputs),
        }
    }
}

impl<M: StateMachine> Drop for Automaton<M> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    machine_states! {
        enum CounterState {
            Startup => "AT_STARTUP",
            Counting => "COUNTING",
            Done => "DONE",
            Failed => "FAILED",
        }
        terminal: [Done, Failed]
    }

    #[derive(Debug)]
    enum CounterEvent {
        Start,
        Tick,
        Boom,
    }

    #[derive(Debug, PartialEq)]
    enum CounterOutput {
        Tick(usize),
        Error(Error),
    }

    impl From<Error> for CounterOutput {
        fn from(err: Error) -> Self {
            CounterOutput::Error(err)
        }
    }

    /// Counts three ticks, chaining them as follow-ups
    struct Counter {
        ticks: usize,
    }

    #[async_trait]
    impl StateMachine for Counter {
        type State = CounterState;
        type Event = CounterEvent;
        type Output = CounterOutput;

        fn name(&self) -> &'static str {
            "counter"
        }

        async fn transition(
            &mut self,
            state: CounterState,
            event: CounterEvent,
            outputs: &mut Vec<CounterOutput>,
        ) -> Result<Transition<CounterState, CounterEvent>> {
            match (state, event) {
                (CounterState::Startup, CounterEvent::Start) => {
                    Ok(Transition::then(CounterState::Counting, CounterEvent::Tick))
                }
                (CounterState::Counting, CounterEvent::Tick) => {
                    self.ticks += 1;
                    outputs.push(CounterOutput::Tick(self.ticks));
                    if self.ticks < 3 {
                        Ok(Transition::then(CounterState::Counting, CounterEvent::Tick))
                    } else {
                        Ok(Transition::to(CounterState::Done))
                    }
                }
                (_, CounterEvent::Boom) => Err(Error::connectivity("boom")),
                (state, event) => Err(Error::automaton(format!("{:?} in {}", event, state))),
            }
        }
    }

    fn options(raise_errors: bool) -> AutomatonConfig {
        AutomatonConfig {
            raise_errors,
            ..AutomatonConfig::default()
        }
    }

    #[tokio::test]
    async fn test_follow_ups_run_to_completion() {
        let registry = AutomatonRegistry::new();
        let mut automaton = Automaton::create(&registry, Counter { ticks: 0 }, options(false));
        assert_eq!(automaton.id(), "counter_1");
        assert_eq!(automaton.state().to_string(), "AT_STARTUP");

        automaton.event(CounterEvent::Start).await.unwrap();

        assert_eq!(automaton.state(), CounterState::Done);
        assert_eq!(automaton.outputs().len(), 3);
    }

    #[tokio::test]
    async fn test_terminal_state_ignores_events() {
        let registry = AutomatonRegistry::new();
        let mut automaton = Automaton::create(&registry, Counter { ticks: 0 }, options(true));
        automaton.event(CounterEvent::Start).await.unwrap();

        automaton.event(CounterEvent::Boom).await.unwrap();
        assert_eq!(automaton.state(), CounterState::Done);
        assert_eq!(automaton.outputs().len(), 3);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_as_output() {
        let registry = AutomatonRegistry::new();
        let mut automaton = Automaton::create(&registry, Counter { ticks: 0 }, options(false));

        automaton.event(CounterEvent::Boom).await.unwrap();

        assert_eq!(automaton.state(), CounterState::Failed);
        assert_eq!(
            automaton.outputs(),
            &[CounterOutput::Error(Error::connectivity("boom"))]
        );
    }

    #[tokio::test]
    async fn test_raise_errors_propagates() {
        let registry = AutomatonRegistry::new();
        let mut automaton = Automaton::create(&registry, Counter { ticks: 0 }, options(true));

        let err = automaton.event(CounterEvent::Boom).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(automaton.state(), CounterState::Failed);
    }

    #[tokio::test]
    async fn test_destroy_unregisters_once() {
        let registry = AutomatonRegistry::new();
        let mut automaton = Automaton::create(&registry, Counter { ticks: 0 }, options(false));
        assert_eq!(registry.live_count(), 1);

        automaton.destroy();
        automaton.destroy();
        assert_eq!(registry.live_count(), 0);

        let err = automaton.event(CounterEvent::Start).await.unwrap_err();
        assert!(matches!(err, Error::Automaton(_)));
    }

    #[tokio::test]
    async fn test_drop_and_finish_unregister() {
        let registry = AutomatonRegistry::new();
        {
            let _automaton = Automaton::create(&registry, Counter { ticks: 0 }, options(false));
            assert_eq!(registry.live_count(), 1);
        }
        assert_eq!(registry.live_count(), 0);

        let mut automaton = Automaton::create(&registry, Counter { ticks: 0 }, options(false));
        automaton.event(CounterEvent::Start).await.unwrap();
        let finished = automaton.finish();
        assert_eq!(finished.id, "counter_2");
        assert!(!finished.failed());
        assert_eq!(finished.outputs.len(), 3);
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test]
    async fn test_state_changes_reach_observers() {
        let registry = AutomatonRegistry::new();
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = changes.clone();
        registry.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut automaton = Automaton::create(&registry, Counter { ticks: 0 }, options(false));
        automaton.event(CounterEvent::Start).await.unwrap();

        // STARTUP -> COUNTING -> DONE; repeated COUNTING is not a change
        assert_eq!(changes.load(Ordering::SeqCst), 2);
    }
}
