//! Error severity shared by every fallible protocol operation.

/// How far the effects of a failure reach.
///
/// Callers branch on severity rather than on concrete error variants: the
/// receive loop retries [`Severity::Transient`] failures, aborts the
/// connection on [`Severity::ConnectionFatal`], and reports
/// [`Severity::DispatchFatal`] failures to dispatch-error observers while the
/// connection stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The current frame or read attempt is lost; the connection continues.
    Transient,
    /// The stream can no longer be trusted and the connection must close.
    ConnectionFatal,
    /// One message could not be handled; the connection continues.
    DispatchFatal,
}

impl Severity {
    /// Returns `true` when the failure requires tearing the connection down.
    #[must_use]
    pub const fn is_connection_fatal(self) -> bool {
        matches!(self, Self::ConnectionFatal)
    }
}
