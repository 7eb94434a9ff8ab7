use std::fmt;

use crate::request::OperationRequest;

/// A request-bound logging interface.
///
/// `OperationLog` is obtained from [`OperationRequest::log`] and cannot
/// outlive the request. Every event carries the session id, the operation
/// label and the target DN.
///
/// Credentials never appear in the output because their `Debug` and
/// `Display` implementations redact them.
#[derive(Debug)]
pub struct OperationLog<'a> {
    request: &'a OperationRequest,
}

impl<'a> OperationLog<'a> {
    pub(crate) fn new(request: &'a OperationRequest) -> Self {
        Self { request }
    }

    /// Session id of the request.
    pub fn session_id(&self) -> u64 {
        self.request.session().id()
    }

    /// Logs an info-level message.
    ///
    /// Use with `format_args!`:
    /// ```no_run
    /// # use directory_core::OperationLog;
    /// # fn example(log: &OperationLog) {
    /// log.info(format_args!("entry {} added", "cn=alice"));
    /// # }
    /// ```
    pub fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(
            session = self.session_id(),
            operation = self.request.kind().label(),
            dn = %self.request.dn(),
            "{}",
            args
        );
    }

    /// Logs a warning-level message.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(
            session = self.session_id(),
            operation = self.request.kind().label(),
            dn = %self.request.dn(),
            "{}",
            args
        );
    }

    /// Logs a debug-level message.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(
            session = self.session_id(),
            operation = self.request.kind().label(),
            dn = %self.request.dn(),
            "{}",
            args
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::Dn;
    use crate::principal::Principal;
    use crate::session::SessionContext;

    #[test]
    fn log_reports_session_of_request() {
        let ctx = SessionContext::new(42, "svc", Principal::anonymous());
        let request = OperationRequest::delete(ctx, Dn::parse("cn=a,o=b").unwrap()).unwrap();
        let log = request.log();
        assert_eq!(log.session_id(), 42);
        log.debug(format_args!("no subscriber installed"));
    }
}
