//! # Turn Coordination
//!
//! Tracks whether a response from the speech service is in flight, so caller
//! audio is never submitted on top of a response that is still being
//! generated.
//!
//! ## States:
//! ```text
//!            submit + request response
//!   Idle  ------------------------------>  ResponseInFlight
//!    ^    <------------------------------      |
//!          response done / error / watchdog    |
//!    |                                          |
//!    +------- response.created (server) -------+
//! ```
//!
//! A live session cycles between the two forever; it only ends when the
//! session is destroyed.
//!
//! ## First Response:
//! Exactly one "first response" trigger fires per session. Under
//! `GreetFirst` it fires when both legs are ready; under `ListenFirst` it rides
//! along with the first submission. Either way the first `response.create`
//! carries the greeting instructions.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::GreetingPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    ResponseInFlight,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::ResponseInFlight => "response_in_flight",
        }
    }
}

/// Outcome of asking to submit a block of caller audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitDecision {
    /// Send the block. `first_response` is true when this submission carries
    /// the one-shot first response trigger.
    Submit { first_response: bool },
    /// A response is in flight; keep the audio buffered.
    Suppress,
}

/// Per-session turn state machine.
#[derive(Debug)]
pub struct TurnCoordinator {
    state: TurnState,
    policy: GreetingPolicy,
    first_response_sent: bool,
    in_flight_since: Option<Instant>,
}

impl TurnCoordinator {
    pub fn new(policy: GreetingPolicy) -> Self {
        Self {
            state: TurnState::Idle,
            policy,
            first_response_sent: false,
            in_flight_since: None,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn first_response_sent(&self) -> bool {
        self.first_response_sent
    }

    /// Both legs are ready (speech service connected, stream addressable).
    ///
    /// Returns true exactly once, and only under `GreetFirst` while idle; the
    /// caller must then send the greeting `response.create`.
    pub fn on_ready(&mut self) -> bool {
        if self.policy != GreetingPolicy::GreetFirst
            || self.first_response_sent
            || self.state != TurnState::Idle
        {
            return false;
        }

        self.first_response_sent = true;
        self.enter_in_flight();
        true
    }

    /// A block of caller audio is ready to submit.
    ///
    /// Submitting requests a response, so on `Submit` the state is already
    /// `ResponseInFlight` when this returns.
    pub fn on_input_ready(&mut self) -> SubmitDecision {
        if self.state == TurnState::ResponseInFlight {
            return SubmitDecision::Suppress;
        }

        let first_response = !self.first_response_sent && self.policy == GreetingPolicy::ListenFirst;
        if first_response {
            self.first_response_sent = true;
        }

        self.enter_in_flight();
        SubmitDecision::Submit { first_response }
    }

    /// The service started a response on its own (server-side turn detection).
    pub fn on_response_created(&mut self) {
        if self.state == TurnState::Idle {
            self.enter_in_flight();
        }
        // A greeting the service started by itself still counts as the first.
        self.first_response_sent = true;
    }

    /// The response finished.
    pub fn on_response_done(&mut self) {
        self.enter_idle();
    }

    /// The service reported an error for the response.
    pub fn on_response_error(&mut self) {
        self.enter_idle();
    }

    /// Deadline after which the watchdog forces the state back to idle.
    pub fn watchdog_deadline(&self, timeout: Option<Duration>) -> Option<Instant> {
        match (self.in_flight_since, timeout) {
            (Some(since), Some(timeout)) => Some(since + timeout),
            _ => None,
        }
    }

    /// Force the state back to idle. Returns true if a response was in flight.
    pub fn on_watchdog_expired(&mut self) -> bool {
        let was_in_flight = self.state == TurnState::ResponseInFlight;
        self.enter_idle();
        was_in_flight
    }

    fn enter_in_flight(&mut self) {
        self.state = TurnState::ResponseInFlight;
        self.in_flight_since = Some(Instant::now());
    }

    fn enter_idle(&mut self) {
        self.state = TurnState::Idle;
        self.in_flight_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_gating() {
        let mut turn = TurnCoordinator::new(GreetingPolicy::GreetFirst);
        assert_eq!(turn.state(), TurnState::Idle);

        assert!(matches!(turn.on_input_ready(), SubmitDecision::Submit { .. }));
        assert_eq!(turn.state(), TurnState::ResponseInFlight);

        assert_eq!(turn.on_input_ready(), SubmitDecision::Suppress);

        turn.on_response_done();
        assert_eq!(turn.state(), TurnState::Idle);
        assert!(matches!(turn.on_input_ready(), SubmitDecision::Submit { .. }));
    }

    #[test]
    fn test_error_returns_to_idle() {
        let mut turn = TurnCoordinator::new(GreetingPolicy::ListenFirst);
        turn.on_input_ready();
        turn.on_response_error();
        assert_eq!(turn.state(), TurnState::Idle);
    }

    #[test]
    fn test_greet_first_fires_once() {
        let mut turn = TurnCoordinator::new(GreetingPolicy::GreetFirst);
        assert!(turn.on_ready());
        assert_eq!(turn.state(), TurnState::ResponseInFlight);
        turn.on_response_done();
        assert!(!turn.on_ready());

        // Submissions never carry the trigger under GreetFirst.
        assert_eq!(turn.on_input_ready(), SubmitDecision::Submit { first_response: false });
    }

    #[test]
    fn test_listen_first_rides_first_submission() {
        let mut turn = TurnCoordinator::new(GreetingPolicy::ListenFirst);
        assert!(!turn.on_ready());
        assert_eq!(turn.state(), TurnState::Idle);

        assert_eq!(turn.on_input_ready(), SubmitDecision::Submit { first_response: true });
        turn.on_response_done();
        assert_eq!(turn.on_input_ready(), SubmitDecision::Submit { first_response: false });
        assert!(turn.first_response_sent());
    }

    #[test]
    fn test_server_created_response() {
        let mut turn = TurnCoordinator::new(GreetingPolicy::GreetFirst);
        turn.on_response_created();
        assert_eq!(turn.state(), TurnState::ResponseInFlight);
        assert!(!turn.on_ready());
        assert_eq!(turn.on_input_ready(), SubmitDecision::Suppress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_deadline() {
        let mut turn = TurnCoordinator::new(GreetingPolicy::ListenFirst);
        let timeout = Some(Duration::from_secs(10));
        assert!(turn.watchdog_deadline(timeout).is_none());

        turn.on_input_ready();
        let deadline = turn.watchdog_deadline(timeout).unwrap();
        assert_eq!(deadline - Instant::now(), Duration::from_secs(10));
        assert!(turn.watchdog_deadline(None).is_none());

        assert!(turn.on_watchdog_expired());
        assert_eq!(turn.state(), TurnState::Idle);
        assert!(!turn.on_watchdog_expired());
    }
}
