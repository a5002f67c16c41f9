//! 流式翻译：异构上游增量格式 → 规范块流
//!
//! 线上契约：若干 `data: <chat.completion.chunk>` 事件，随后恰好一个 `data: [DONE]`，之后不再有任何事件。
//! - Translate 模式：按行调用适配器 translate_chunk，显式完成标记或上游关闭时补发 stop 块与终止标记；
//! - Passthrough 模式（Tee）：上游字节原样转发，同时旁路送入累积任务重建全文，
//!   仅在上游正常关闭后释放全文；客户端断开则丢弃，不触发工具扫描。

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};

use crate::llm::traits::BackendAdapter;
use crate::llm::types::{completion_id, unix_now, CanonicalChunk, FINISH_STOP};

/// 终止标记（SSE data 内容）
pub const DONE_MARKER: &str = "[DONE]";

/// 规范事件：内容块或终止标记
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Chunk(CanonicalChunk),
    Done,
}

impl StreamEvent {
    /// 编码为一条 SSE 事件
    pub fn to_sse_bytes(&self) -> Bytes {
        match self {
            StreamEvent::Chunk(chunk) => Bytes::from(format!("data: {}\n\n", chunk.to_json())),
            StreamEvent::Done => Bytes::from(format!("data: {}\n\n", DONE_MARKER)),
        }
    }
}

/// 单行翻译结果
#[derive(Clone, Debug, PartialEq)]
pub enum ChunkOutcome {
    Chunk(CanonicalChunk),
    /// 上游显式完成
    Done,
    /// 空行、心跳、无内容或格式错误的行
    Skip,
}

/// 单次流的共享元数据：同一流内所有块共用 id / created / model
#[derive(Clone, Debug)]
pub struct ChunkContext {
    pub id: String,
    pub created: i64,
    pub model: String,
}

impl ChunkContext {
    pub fn new(prefix: Option<&str>, model: impl Into<String>) -> Self {
        Self {
            id: completion_id(prefix),
            created: unix_now(),
            model: model.into(),
        }
    }

    pub fn chunk(&self, delta: impl Into<String>) -> CanonicalChunk {
        CanonicalChunk {
            id: self.id.clone(),
            created: self.created,
            model: self.model.clone(),
            delta_content: delta.into(),
            finish_reason: None,
        }
    }

    /// 逻辑上的最后一块：空 delta，finish_reason = stop
    pub fn stop(&self) -> CanonicalChunk {
        CanonicalChunk {
            finish_reason: Some(FINISH_STOP.to_string()),
            ..self.chunk("")
        }
    }
}

/// 将任意切分的字节流还原为完整行（去掉行尾 \r）
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// 上游关闭时取出未以换行结尾的残余行
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        let line = decode_line(&rest);
        if line.trim().is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;
type UpstreamBytes = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// 交给 HTTP 层的流：SSE 字节体 + 流结束后才会就绪的助手全文
pub struct ChatStream {
    pub body: ByteStream,
    pub transcript: oneshot::Receiver<String>,
}

struct TranslateState {
    upstream: UpstreamBytes,
    decoder: LineDecoder,
    adapter: Arc<dyn BackendAdapter>,
    ctx: ChunkContext,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

impl TranslateState {
    fn handle_line(&mut self, line: &str) {
        if self.finished || line.trim().is_empty() {
            return;
        }
        match self.adapter.translate_chunk(&self.ctx, line) {
            ChunkOutcome::Chunk(chunk) => self.pending.push_back(StreamEvent::Chunk(chunk)),
            ChunkOutcome::Done => self.finish(),
            ChunkOutcome::Skip => {}
        }
    }

    /// 补发 stop 块与终止标记；只生效一次
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.pending.push_back(StreamEvent::Chunk(self.ctx.stop()));
        self.pending.push_back(StreamEvent::Done);
        self.finished = true;
    }

    fn close(&mut self) {
        if let Some(rest) = self.decoder.finish() {
            self.handle_line(&rest);
        }
        self.finish();
    }
}

/// 按行翻译上游字节流；保证以恰好一个 Done 结束
pub fn translate_stream<S>(adapter: Arc<dyn BackendAdapter>, ctx: ChunkContext, upstream: S) -> EventStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = TranslateState {
        upstream: Box::pin(upstream),
        decoder: LineDecoder::new(),
        adapter,
        ctx,
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(ev) = st.pending.pop_front() {
                return Some((ev, st));
            }
            if st.finished {
                return None;
            }
            match st.upstream.next().await {
                Some(Ok(bytes)) => {
                    for line in st.decoder.push(&bytes) {
                        st.handle_line(&line);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(backend = st.adapter.name(), error = %e, "upstream stream interrupted");
                    st.close();
                }
                None => st.close(),
            }
        }
    }))
}

/// 规范事件流 → SSE 字节体；收到 Done 时释放累积全文
pub fn sse_body(events: EventStream) -> ChatStream {
    let (tx, rx) = oneshot::channel();
    let body = stream::unfold(
        (events, String::new(), Some(tx)),
        |(mut events, mut text, mut tx)| async move {
            let ev = events.next().await?;
            match &ev {
                StreamEvent::Chunk(chunk) => text.push_str(&chunk.delta_content),
                StreamEvent::Done => {
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(std::mem::take(&mut text));
                    }
                }
            }
            Some((Ok(ev.to_sse_bytes()), (events, text, tx)))
        },
    );
    ChatStream {
        body: Box::pin(body),
        transcript: rx,
    }
}

enum TapMessage {
    Data(Bytes),
    End,
}

/// 旁路分流：主路原样转发上游字节；支路经无界通道送往累积任务，永不阻塞主路
struct Tee {
    upstream: UpstreamBytes,
    tap: Option<mpsc::UnboundedSender<TapMessage>>,
}

impl Stream for Tee {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.upstream.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                if let Some(tap) = &self.tap {
                    let _ = tap.send(TapMessage::Data(bytes.clone()));
                }
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(Err(e))) => {
                // 中途失败：不发送 End，累积任务丢弃部分全文
                self.tap = None;
                Poll::Ready(Some(Err(std::io::Error::other(e))))
            }
            Poll::Ready(None) => {
                if let Some(tap) = self.tap.take() {
                    let _ = tap.send(TapMessage::End);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// 构造 Passthrough 流：需在 tokio 运行时内调用（累积任务在后台运行）
pub fn tee<S>(adapter: Arc<dyn BackendAdapter>, ctx: ChunkContext, upstream: S) -> ChatStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let (tap_tx, mut tap_rx) = mpsc::unbounded_channel::<TapMessage>();
    let (text_tx, text_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut decoder = LineDecoder::new();
        let mut text = String::new();
        let collect = |line: &str, text: &mut String| {
            if let ChunkOutcome::Chunk(chunk) = adapter.translate_chunk(&ctx, line) {
                text.push_str(&chunk.delta_content);
            }
        };
        while let Some(msg) = tap_rx.recv().await {
            match msg {
                TapMessage::Data(bytes) => {
                    for line in decoder.push(&bytes) {
                        collect(&line, &mut text);
                    }
                }
                TapMessage::End => {
                    if let Some(rest) = decoder.finish() {
                        collect(&rest, &mut text);
                    }
                    let _ = text_tx.send(text);
                    return;
                }
            }
        }
        tracing::debug!("passthrough stream dropped before completion, transcript discarded");
    });

    ChatStream {
        body: Box::pin(Tee {
            upstream: Box::pin(upstream),
            tap: Some(tap_tx),
        }),
        transcript: text_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GatewayError;
    use crate::llm::traits::{ProviderReply, ProviderRequest};
    use crate::llm::types::{CanonicalResponse, ChatRequest};
    use async_trait::async_trait;
    use serde_json::Value;

    /// 测试用适配器：`+text` 为内容行，`!` 为完成标记，其余跳过
    struct ScriptAdapter;

    #[async_trait]
    impl BackendAdapter for ScriptAdapter {
        fn name(&self) -> &'static str {
            "script"
        }

        fn translate_request(&self, _request: &ChatRequest) -> Result<ProviderRequest, GatewayError> {
            Err(GatewayError::Config("unused".into()))
        }

        async fn invoke(&self, _request: ProviderRequest) -> Result<ProviderReply, GatewayError> {
            Err(GatewayError::Config("unused".into()))
        }

        fn translate_response(&self, _model: &str, _body: Value) -> Result<CanonicalResponse, GatewayError> {
            Err(GatewayError::Config("unused".into()))
        }

        fn translate_chunk(&self, ctx: &ChunkContext, line: &str) -> ChunkOutcome {
            if let Some(text) = line.strip_prefix('+') {
                ChunkOutcome::Chunk(ctx.chunk(text))
            } else if line == "!" {
                ChunkOutcome::Done
            } else {
                ChunkOutcome::Skip
            }
        }
    }

    fn upstream(parts: &[&str]) -> impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static {
        let parts: Vec<reqwest::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        stream::iter(parts)
    }

    fn ctx() -> ChunkContext {
        ChunkContext::new(None, "test-model")
    }

    #[test]
    fn test_line_decoder_handles_split_lines_and_crlf() {
        let mut d = LineDecoder::new();
        assert!(d.push(b"ab").is_empty());
        assert_eq!(d.push(b"c\r\nde\nf"), vec!["abc".to_string(), "de".to_string()]);
        assert_eq!(d.finish(), Some("f".to_string()));
        assert_eq!(d.finish(), None);
    }

    #[tokio::test]
    async fn test_explicit_done_terminates_and_drops_trailing_lines() {
        let adapter: Arc<dyn BackendAdapter> = Arc::new(ScriptAdapter);
        let events: Vec<StreamEvent> =
            translate_stream(adapter, ctx(), upstream(&["+He", "llo\n+ wor", "ld\n!\n+late\n"]))
                .collect()
                .await;

        let texts: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk(c) if c.finish_reason.is_none() => Some(c.delta_content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Hello", " world"]);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(events.iter().filter(|e| **e == StreamEvent::Done).count(), 1);
        match &events[events.len() - 2] {
            StreamEvent::Chunk(c) => assert_eq!(c.finish_reason.as_deref(), Some("stop")),
            other => panic!("expected stop chunk, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_without_marker_synthesizes_done() {
        let adapter: Arc<dyn BackendAdapter> = Arc::new(ScriptAdapter);
        let events: Vec<StreamEvent> = translate_stream(adapter, ctx(), upstream(&["+a\n", "junk\n+b"]))
            .collect()
            .await;
        assert_eq!(events.len(), 4);
        assert_eq!(events[1], StreamEvent::Chunk(ctx_like(&events, "b")));
        assert_eq!(events[3], StreamEvent::Done);
    }

    fn ctx_like(events: &[StreamEvent], delta: &str) -> CanonicalChunk {
        match &events[0] {
            StreamEvent::Chunk(c) => CanonicalChunk {
                delta_content: delta.to_string(),
                ..c.clone()
            },
            StreamEvent::Done => panic!("first event must be a chunk"),
        }
    }

    #[tokio::test]
    async fn test_empty_upstream_still_yields_terminal() {
        let adapter: Arc<dyn BackendAdapter> = Arc::new(ScriptAdapter);
        let events: Vec<StreamEvent> = translate_stream(adapter, ctx(), upstream(&[])).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], StreamEvent::Done);
    }

    #[tokio::test]
    async fn test_sse_body_releases_transcript_at_done() {
        let adapter: Arc<dyn BackendAdapter> = Arc::new(ScriptAdapter);
        let events = translate_stream(adapter, ctx(), upstream(&["+Hi [SEARCH: \"x\"]\n"]));
        let ChatStream { body, transcript } = sse_body(events);
        let frames: Vec<Bytes> = body.map(|b| b.unwrap()).collect().await;

        let last = String::from_utf8(frames.last().unwrap().to_vec()).unwrap();
        assert_eq!(last, "data: [DONE]\n\n");
        assert!(frames.iter().all(|f| f.starts_with(b"data: ")));
        assert_eq!(transcript.await.unwrap(), "Hi [SEARCH: \"x\"]");
    }

    #[tokio::test]
    async fn test_sse_body_dropped_early_releases_nothing() {
        let adapter: Arc<dyn BackendAdapter> = Arc::new(ScriptAdapter);
        let events = translate_stream(adapter, ctx(), upstream(&["+one\n", "+two [SEARCH: \"x\"]\n"]));
        let ChatStream { mut body, transcript } = sse_body(events);
        let first = body.next().await.unwrap().unwrap();
        assert!(first.starts_with(b"data: "));
        drop(body);
        assert!(transcript.await.is_err());
    }

    #[tokio::test]
    async fn test_tee_forwards_bytes_unmodified_and_accumulates() {
        let adapter: Arc<dyn BackendAdapter> = Arc::new(ScriptAdapter);
        let parts = ["+one\n+tw", "o\nnoise\n", "!\n"];
        let ChatStream { body, transcript } = tee(adapter, ctx(), upstream(&parts));
        let forwarded: Vec<u8> = body
            .map(|b| b.unwrap().to_vec())
            .collect::<Vec<_>>()
            .await
            .concat();
        assert_eq!(forwarded, parts.concat().into_bytes());
        assert_eq!(transcript.await.unwrap(), "onetwo");
    }

    #[tokio::test]
    async fn test_tee_dropped_early_releases_nothing() {
        let adapter: Arc<dyn BackendAdapter> = Arc::new(ScriptAdapter);
        let ChatStream { mut body, transcript } = tee(adapter, ctx(), upstream(&["+one\n", "+two\n"]));
        let _ = body.next().await;
        drop(body);
        assert!(transcript.await.is_err());
    }
}
