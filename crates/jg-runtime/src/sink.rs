use jg_core::{RequestContext, Verdict};
use tokio::sync::mpsc;

/// Receives the verdict of every request in a successfully matched batch.
///
/// Requests in a failed batch are never delivered; consumers must treat a
/// missing verdict as "no match".
pub trait VerdictSink: Send + Sync {
    fn deliver(&self, context: RequestContext, verdict: Verdict);
}

/// Forwards verdicts into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(RequestContext, Verdict)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(RequestContext, Verdict)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl VerdictSink for ChannelSink {
    fn deliver(&self, context: RequestContext, verdict: Verdict) {
        if self.tx.send((context, verdict)).is_err() {
            log::debug!("Verdict receiver dropped");
        }
    }
}

impl<F> VerdictSink for F
where
    F: Fn(RequestContext, Verdict) + Send + Sync,
{
    fn deliver(&self, context: RequestContext, verdict: Verdict) {
        self(context, verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jg_core::{Disposition, PatternSetId};

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        let ctx = RequestContext::new("example.com", 7, "00");
        sink.deliver(ctx.clone(), Verdict::new().with_match(PatternSetId::BLOCKLIST, true));

        let (got_ctx, verdict) = rx.recv().await.unwrap();
        assert_eq!(got_ctx, ctx);
        assert_eq!(verdict.disposition(), Disposition::Block);
    }

    #[test]
    fn test_closure_sink() {
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |ctx: RequestContext, _verdict: Verdict| seen.lock().unwrap().push(ctx.tab_id);
        sink.deliver(RequestContext::new("a.test", 1, "00"), Verdict::new());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }
}
