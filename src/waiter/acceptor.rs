use std::sync::Arc;

use crate::error::Error;

/// State a matched acceptor moves the waiter into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AcceptorState {
    Success,
    Retry,
    Failure,
}

impl std::fmt::Display for AcceptorState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(match self {
            Self::Success => "success",
            Self::Retry => "retry",
            Self::Failure => "failure",
        })
    }
}

type OutputPredicate<O> = dyn Fn(&O) -> bool + Send + Sync;
type InputOutputPredicate<I, O> = dyn Fn(&I, &O) -> bool + Send + Sync;

pub enum Matcher<I, O> {
    /// Predicate over a successful output; never matches an error.
    Output(Arc<OutputPredicate<O>>),
    /// Predicate over the polled input and a successful output.
    InputOutput(Arc<InputOutputPredicate<I, O>>),
    /// `true` matches any successful poll, `false` any failed one.
    Success(bool),
    /// Matches a modeled service error with exactly this code.
    ErrorType(String),
}

impl<I, O> Clone for Matcher<I, O> {
    fn clone(&self) -> Self {
        match self {
            Self::Output(predicate) => Self::Output(Arc::clone(predicate)),
            Self::InputOutput(predicate) => Self::InputOutput(Arc::clone(predicate)),
            Self::Success(success) => Self::Success(*success),
            Self::ErrorType(code) => Self::ErrorType(code.clone()),
        }
    }
}

impl<I, O> std::fmt::Debug for Matcher<I, O> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Output(_) => formatter.write_str("Output(..)"),
            Self::InputOutput(_) => formatter.write_str("InputOutput(..)"),
            Self::Success(success) => formatter.debug_tuple("Success").field(success).finish(),
            Self::ErrorType(code) => formatter.debug_tuple("ErrorType").field(code).finish(),
        }
    }
}

impl<I, O> Matcher<I, O> {
    pub fn matches(&self, input: &I, result: &Result<O, Error>) -> bool {
        match (self, result) {
            (Self::Output(predicate), Ok(output)) => predicate(output),
            (Self::InputOutput(predicate), Ok(output)) => predicate(input, output),
            (Self::Output(_) | Self::InputOutput(_), Err(_)) => false,
            (Self::Success(expected), result) => *expected == result.is_ok(),
            (Self::ErrorType(_), Ok(_)) => false,
            (Self::ErrorType(code), Err(Error::Service(error))) => {
                error.code.as_deref() == Some(code.as_str())
            }
            (Self::ErrorType(_), Err(_)) => false,
        }
    }
}

/// A matcher paired with the state it selects.
#[derive(Clone, Debug)]
pub struct Acceptor<I, O> {
    pub state: AcceptorState,
    pub matcher: Matcher<I, O>,
}

impl<I, O> Acceptor<I, O> {
    pub fn new(state: AcceptorState, matcher: Matcher<I, O>) -> Self {
        Self { state, matcher }
    }

    pub fn output<F>(state: AcceptorState, predicate: F) -> Self
    where
        F: Fn(&O) -> bool + Send + Sync + 'static,
    {
        Self::new(state, Matcher::Output(Arc::new(predicate)))
    }

    pub fn input_output<F>(state: AcceptorState, predicate: F) -> Self
    where
        F: Fn(&I, &O) -> bool + Send + Sync + 'static,
    {
        Self::new(state, Matcher::InputOutput(Arc::new(predicate)))
    }

    pub fn success(state: AcceptorState, success: bool) -> Self {
        Self::new(state, Matcher::Success(success))
    }

    pub fn error_type(state: AcceptorState, code: impl Into<String>) -> Self {
        Self::new(state, Matcher::ErrorType(code.into()))
    }

    pub fn matches(&self, input: &I, result: &Result<O, Error>) -> bool {
        self.matcher.matches(input, result)
    }
}

#[cfg(test)]
mod tests {
    use super::{Acceptor, AcceptorState, Matcher};
    use crate::error::{Error, ServiceError, TransportErrorKind};

    fn not_found() -> Result<String, Error> {
        Err(ServiceError::from_status(404)
            .with_code("ResourceNotFoundException")
            .into())
    }

    #[test]
    fn output_matchers_ignore_errors() {
        let acceptor: Acceptor<(), String> =
            Acceptor::output(AcceptorState::Success, |status: &String| status == "ACTIVE");
        assert!(acceptor.matches(&(), &Ok("ACTIVE".to_owned())));
        assert!(!acceptor.matches(&(), &Ok("CREATING".to_owned())));
        assert!(!acceptor.matches(&(), &not_found()));
    }

    #[test]
    fn input_output_sees_both() {
        let acceptor: Acceptor<u32, u32> =
            Acceptor::input_output(AcceptorState::Success, |wanted: &u32, seen: &u32| {
                wanted == seen
            });
        assert!(acceptor.matches(&3, &Ok(3)));
        assert!(!acceptor.matches(&3, &Ok(2)));
    }

    #[test]
    fn success_matcher_splits_on_outcome() {
        let ok: Matcher<(), String> = Matcher::Success(true);
        let failed: Matcher<(), String> = Matcher::Success(false);
        assert!(ok.matches(&(), &Ok(String::new())));
        assert!(!ok.matches(&(), &not_found()));
        assert!(failed.matches(&(), &not_found()));
    }

    #[test]
    fn error_type_is_exact_on_service_code() {
        let acceptor: Acceptor<(), String> =
            Acceptor::error_type(AcceptorState::Success, "ResourceNotFoundException");
        assert!(acceptor.matches(&(), &not_found()));
        assert!(!acceptor.matches(
            &(),
            &Err(ServiceError::from_status(404).with_code("ResourceNotFound").into())
        ));
        assert!(!acceptor.matches(
            &(),
            &Err(Error::transport(TransportErrorKind::Connect, "refused"))
        ));
        assert!(!acceptor.matches(&(), &Ok(String::new())));
    }
}
