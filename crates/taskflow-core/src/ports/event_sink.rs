//! EventSink port - 実行の記録を外へ流す
//!
//! dispatcher は投入時に `Dispatched` を、`Timed` は実行の前後に
//! `ExecutionStarted` / `ExecutionEnded` を出します。
//! sink は worker 上で同期的に呼ばれるので、重い処理はチャネルの先で行う。

use tokio::sync::mpsc;

use crate::domain::DispatchEvent;

/// Receives dispatch lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DispatchEvent);
}

/// Sink that drops every event. Used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: DispatchEvent) {}
}

/// Forward into a channel; a closed receiver is ignored.
impl EventSink for mpsc::UnboundedSender<DispatchEvent> {
    fn emit(&self, event: DispatchEvent) {
        let _ = self.send(event);
    }
}
