//! Typed failures with cause chains and consequences.
//!
//! Every fallible operation in the crate reports a [`Failure`]: a categorised
//! error carrying an optional underlying cause, an ordered list of
//! *consequences* (errors that occurred while recovering from the primary
//! error, recorded alongside it and never replacing it), and a free-form map
//! of structured fields. Failures project to a stable gRPC code when they
//! cross the service boundary.
//!
//! The compensating-rollback scope used by multi-step orchestrations lives in
//! [`Rollback`].

mod rollback;

pub use rollback::Rollback;

use std::any::Any;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tonic::Code;

/// Category of a [`Failure`].
///
/// The category decides retry behaviour and the gRPC code used at the service
/// boundary; the message carries the human-readable detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A bounded operation exceeded its wall-clock budget.
    Timeout,
    /// The referenced resource does not exist.
    NotFound,
    /// The resource exists but cannot serve the request right now.
    NotAvailable,
    /// A resource with the same identity already exists.
    Duplicate,
    /// The request itself is malformed or unacceptable.
    InvalidRequest,
    /// A parameter violates the callee's contract.
    InvalidParameter,
    /// A method was invoked on a null or deleted instance.
    InvalidInstance,
    /// The instance carries content of an unexpected shape.
    InvalidInstanceContent,
    /// The caller is not authenticated.
    NotAuthenticated,
    /// The caller is authenticated but not allowed.
    Forbidden,
    /// The surrounding task was aborted.
    Aborted,
    /// A numeric or capacity bound was exceeded.
    Overflow,
    /// The provider is rate-limiting or otherwise overloaded.
    Overload,
    /// The operation is not implemented.
    NotImplemented,
    /// A panic was captured at a public entry point.
    RuntimePanic,
    /// Internal invariant violation; indicates a programming error.
    Inconsistent,
    /// An aggregate of several independent failures.
    List,
}

/// The error type used throughout the orchestration core.
#[derive(Debug)]
pub struct Failure {
    kind: FailureKind,
    message: String,
    cause: Option<Box<dyn StdError + Send + Sync>>,
    consequences: Vec<Failure>,
    fields: BTreeMap<String, serde_json::Value>,
}

impl Failure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            consequences: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    /// A bounded operation exceeded its budget.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    /// The referenced resource does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    /// The resource cannot serve the request in its current state.
    pub fn not_available(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotAvailable, message)
    }

    /// A resource with the same identity already exists.
    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Duplicate, message)
    }

    /// The request is malformed or unacceptable.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidRequest, message)
    }

    /// A parameter violates the callee's contract.
    pub fn invalid_parameter(name: &str, reason: &str) -> Self {
        Self::new(
            FailureKind::InvalidParameter,
            format!("invalid parameter '{name}': {reason}"),
        )
    }

    /// A method was invoked on a null or deleted instance.
    pub fn invalid_instance() -> Self {
        Self::new(
            FailureKind::InvalidInstance,
            "invalid instance: calling method on a null value",
        )
    }

    /// The instance carries content of an unexpected shape.
    pub fn invalid_instance_content(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidInstanceContent, message)
    }

    /// The caller is not authenticated.
    pub fn not_authenticated(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotAuthenticated, message)
    }

    /// The caller is authenticated but not allowed.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Forbidden, message)
    }

    /// The surrounding task was aborted.
    pub fn aborted() -> Self {
        Self::new(FailureKind::Aborted, "aborted")
    }

    /// A numeric or capacity bound was exceeded.
    pub fn overflow(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Overflow, message)
    }

    /// The provider is rate-limiting or otherwise overloaded.
    pub fn overload(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Overload, message)
    }

    /// The operation is not implemented.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotImplemented, message)
    }

    /// Internal invariant violation.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Inconsistent, message)
    }

    /// Aggregate several independent failures into one.
    ///
    /// The aggregate keeps the individual failures as consequences, so none
    /// of them is lost in the projection to a single error value.
    pub fn list(failures: Vec<Failure>) -> Self {
        let mut aggregate = Self::new(
            FailureKind::List,
            format!("{} error(s) occurred", failures.len()),
        );
        aggregate.consequences = failures;
        aggregate
    }

    /// Wrap `cause` under a new message, keeping its category.
    ///
    /// Wrapping annotates context while retry and tolerance decisions keep
    /// seeing the original category (a wrapped timeout is still a timeout).
    pub fn wrap(cause: Failure, message: impl Into<String>) -> Self {
        let kind = cause.kind;
        Self::new(kind, message).with_cause(cause)
    }

    /// Attach an underlying cause.
    pub fn with_cause(mut self, cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Attach a structured annotation.
    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Record an error that occurred while recovering from this one.
    ///
    /// Consequences never shadow the primary failure; they are appended in
    /// the order they happened.
    pub fn add_consequence(&mut self, consequence: Failure) -> &mut Self {
        self.consequences.push(consequence);
        self
    }

    /// The failure category.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// True if the failure is of the given category.
    pub fn is(&self, kind: FailureKind) -> bool {
        self.kind == kind
    }

    /// The primary message, without cause or consequence decoration.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The immediate underlying cause, if any.
    pub fn cause(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn StdError + 'static))
    }

    /// The deepest cause in the chain; `self` when there is none.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }

    /// Errors recorded while recovering from this failure.
    pub fn consequences(&self) -> &[Failure] {
        &self.consequences
    }

    /// Structured annotations attached to this failure.
    pub fn fields(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.fields
    }

    /// The stable gRPC code used when this failure crosses the service
    /// boundary.
    pub fn grpc_code(&self) -> Code {
        match self.kind {
            FailureKind::Timeout => Code::DeadlineExceeded,
            FailureKind::NotFound => Code::NotFound,
            FailureKind::NotAvailable => Code::Unavailable,
            FailureKind::Duplicate => Code::AlreadyExists,
            FailureKind::InvalidRequest => Code::InvalidArgument,
            FailureKind::InvalidParameter
            | FailureKind::InvalidInstance
            | FailureKind::InvalidInstanceContent => Code::FailedPrecondition,
            FailureKind::NotAuthenticated => Code::Unauthenticated,
            FailureKind::Forbidden => Code::PermissionDenied,
            FailureKind::Aborted => Code::Aborted,
            FailureKind::Overflow => Code::OutOfRange,
            FailureKind::Overload => Code::ResourceExhausted,
            FailureKind::NotImplemented => Code::Unimplemented,
            FailureKind::RuntimePanic => Code::Internal,
            FailureKind::Inconsistent => Code::DataLoss,
            FailureKind::List => Code::Unknown,
        }
    }

    /// Project the failure to a gRPC status.
    pub fn to_status(&self) -> tonic::Status {
        tonic::Status::new(self.grpc_code(), self.to_string())
    }

    /// Rebuild a failure from a gRPC code and message received from a peer.
    pub fn from_code(code: Code, message: &str) -> Self {
        let kind = match code {
            Code::DeadlineExceeded => FailureKind::Timeout,
            Code::NotFound => FailureKind::NotFound,
            Code::Unavailable => FailureKind::NotAvailable,
            Code::AlreadyExists => FailureKind::Duplicate,
            Code::InvalidArgument => FailureKind::InvalidRequest,
            Code::FailedPrecondition => FailureKind::InvalidParameter,
            Code::Unauthenticated => FailureKind::NotAuthenticated,
            Code::PermissionDenied => FailureKind::Forbidden,
            Code::Aborted => FailureKind::Aborted,
            Code::OutOfRange => FailureKind::Overflow,
            Code::ResourceExhausted => FailureKind::Overload,
            Code::Unimplemented => FailureKind::NotImplemented,
            Code::Internal => FailureKind::RuntimePanic,
            Code::DataLoss => FailureKind::Inconsistent,
            _ => FailureKind::List,
        };
        Self::new(kind, message)
    }

    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(FailureKind::RuntimePanic, "runtime panic captured")
            .with_field("panic", message)
    }

    fn cause_formatter(&self) -> String {
        let mut out = String::new();
        if let Some(cause) = self.cause() {
            out.push_str(" [caused by {");
            out.push_str(&cause.to_string());
            out.push_str("}]");
        }
        if !self.consequences.is_empty() {
            out.push_str("[with consequences {");
            for (index, consequence) in self.consequences.iter().enumerate() {
                if index > 0 {
                    out.push(';');
                }
                out.push_str(&consequence.to_string());
            }
            out.push_str("}]");
        }
        out
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.message, self.cause_formatter())?;
        if !self.fields.is_empty() {
            let rendered = serde_json::to_string(&self.fields).unwrap_or_default();
            write!(f, " With fields: {rendered}")?;
        }
        Ok(())
    }
}

impl StdError for Failure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause()
    }
}

/// Combine an operation outcome with the outcome of the lock release that
/// followed it: the operation's failure wins, and a release failure is
/// recorded as its consequence rather than shadowing it.
pub(crate) fn merge_unlock<R>(
    outcome: Result<R, Failure>,
    unlock: Result<(), Failure>,
) -> Result<R, Failure> {
    match (outcome, unlock) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(unlock_failure)) => Err(unlock_failure),
        (Err(failure), Ok(())) => Err(failure),
        (Err(mut failure), Err(unlock_failure)) => {
            failure.add_consequence(unlock_failure);
            Err(failure)
        }
    }
}

/// Run a future, converting a panic into a [`FailureKind::RuntimePanic`]
/// failure instead of unwinding through the caller.
///
/// Installed at every externally-visible resource method and at subtask
/// joins, so a panicking callback surfaces as an error with the panic payload
/// in the `panic` field rather than tearing down the worker.
pub async fn panic_shield<T, F>(fut: F) -> Result<T, Failure>
where
    F: Future<Output = Result<T, Failure>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(Failure::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_plain_message() {
        let failure = Failure::not_found("network 'n1' not found");
        assert_eq!(failure.to_string(), "network 'n1' not found");
    }

    #[test]
    fn display_with_cause_and_consequences() {
        let mut failure = Failure::wrap(
            Failure::timeout("provider did not answer within 30s"),
            "failed to create gateway 'gw-n1'",
        );
        failure.add_consequence(Failure::not_found("vip already gone"));
        failure.add_consequence(Failure::timeout("network deletion timed out"));
        assert_eq!(
            failure.to_string(),
            "failed to create gateway 'gw-n1' [caused by {provider did not answer within 30s}]\
             [with consequences {vip already gone;network deletion timed out}]"
        );
    }

    #[test]
    fn display_with_fields() {
        let failure = Failure::forbidden("tenant mismatch").with_field("tenant", "acme");
        assert_eq!(
            failure.to_string(),
            "tenant mismatch With fields: {\"tenant\":\"acme\"}"
        );
    }

    #[test]
    fn wrap_preserves_kind() {
        let wrapped = Failure::wrap(Failure::timeout("slow"), "outer context");
        assert!(wrapped.is(FailureKind::Timeout));
        assert_eq!(wrapped.grpc_code(), Code::DeadlineExceeded);
    }

    #[test]
    fn root_cause_walks_the_chain() {
        let inner = Failure::not_found("image 'x' absent");
        let middle = Failure::wrap(inner, "unable to resolve gateway image");
        let outer = Failure::wrap(middle, "network creation failed");
        assert_eq!(outer.root_cause().to_string(), "image 'x' absent");
    }

    #[test]
    fn consequences_never_shadow_the_primary() {
        let mut failure = Failure::duplicate("network 'n1' already exists");
        failure.add_consequence(Failure::inconsistent("cleanup hiccup"));
        assert!(failure.is(FailureKind::Duplicate));
        assert_eq!(failure.consequences().len(), 1);
    }

    #[test]
    fn grpc_round_trip_keeps_the_category() {
        let failure = Failure::duplicate("network 'n1' already exists");
        let rebuilt = Failure::from_code(failure.grpc_code(), failure.message());
        assert!(rebuilt.is(FailureKind::Duplicate));
    }

    #[test]
    fn list_aggregates_as_consequences() {
        let aggregate = Failure::list(vec![
            Failure::timeout("host deletion timed out"),
            Failure::not_found("metadata already gone"),
        ]);
        assert!(aggregate.is(FailureKind::List));
        assert_eq!(aggregate.consequences().len(), 2);
    }

    #[tokio::test]
    async fn panic_shield_converts_panics() {
        let outcome: Result<(), Failure> = panic_shield(async { panic!("boom") }).await;
        let failure = outcome.unwrap_err();
        assert!(failure.is(FailureKind::RuntimePanic));
        assert_eq!(failure.fields()["panic"], "boom");
    }

    #[tokio::test]
    async fn panic_shield_passes_results_through() {
        let outcome = panic_shield(async { Ok::<_, Failure>(7) }).await;
        assert_eq!(outcome.unwrap(), 7);
    }
}
