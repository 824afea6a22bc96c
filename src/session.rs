//! [WebSocket] client session (C9 client-facing half).
//!
//! One [`WsSession`] actor per connected browser, modelled on the
//! teacher's `WsSession` in `mock/control-api/src/api/ws.rs`: an `actix`
//! actor over `ws::WebsocketContext`, a periodic `run_interval` in place
//! of a blocking poll loop, and `StreamHandler` for inbound frames.
//!
//! [WebSocket]: https://en.wikipedia.org/wiki/WebSocket

use std::time::Duration;

use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{
    web::{Data, Payload},
    Error, HttpRequest, HttpResponse,
};
use actix_web_actors::ws;
use slog::{debug, o, warn, Logger};

use crate::adaptor::SessionAdaptor;
use crate::engine::Engine;
use crate::proto::{ClientMsg, ErrorMsg, ServerMsg};
use std::sync::Arc;

/// Upper bound on a single inbound message, past which it is discarded
/// rather than decoded. Overridden by `MAX_JSON_MSG_LEN` at startup.
pub const DEFAULT_MAX_JSON_MSG_LEN: usize = 64 * 1024;

/// How often the session drains the bus and ticks its rate adaptor.
const TICK_INTERVAL: Duration = Duration::from_millis(20);

pub struct WsSession {
    engine: Arc<Engine>,
    adaptor: SessionAdaptor,
    max_msg_len: usize,
    log: Logger,
    fragment_buffer: String,
}

impl WsSession {
    fn new(engine: Arc<Engine>, max_msg_len: usize, log: Logger) -> Result<Self, crate::queue::QueueError> {
        let adaptor = SessionAdaptor::new(&engine.bus)?;
        Ok(Self {
            engine,
            adaptor,
            max_msg_len,
            log,
            fragment_buffer: String::new(),
        })
    }

    fn send_initial_state(&self, ctx: &mut ws::WebsocketContext<Self>) {
        for msg in self.engine.initial_messages() {
            send(ctx, &self.log, &msg);
        }
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        if text.len() >= self.max_msg_len {
            warn!(self.log, "dropping oversize inbound message"; "len" => text.len());
            return;
        }
        let parsed: Result<ClientMsg, _> = serde_json::from_str(text);
        match parsed {
            Ok(ClientMsg::Hello(_)) => {
                self.send_initial_state(ctx);
            }
            Ok(ClientMsg::DevSelect(d)) => {
                let echo = self.engine.select_interface(d.iface);
                send(ctx, &self.log, &echo);
            }
            Ok(ClientMsg::SetNetem(params)) => {
                let echo = self.engine.apply_netem(params);
                send(ctx, &self.log, &echo);
            }
            Ok(ClientMsg::PcapConfig(cfg)) => {
                self.engine.pcap.set_config(crate::pcap::PcapConfig {
                    max_memory_bytes: cfg.max_memory_bytes,
                    duration: Duration::from_secs(u64::from(cfg.duration_sec)),
                    pre_trigger: Duration::from_secs(u64::from(cfg.pre_trigger_sec)),
                    post_trigger: Duration::from_secs(u64::from(cfg.post_trigger_sec)),
                    ..crate::pcap::PcapConfig::default()
                });
                send(ctx, &self.log, &ServerMsg::PcapConfig(cfg));
            }
            Ok(ClientMsg::PcapTrigger(trigger)) => {
                self.handle_pcap_trigger(trigger, ctx);
            }
            Err(e) => {
                debug!(self.log, "malformed or unrecognised inbound message"; "error" => %e);
            }
        }
    }

    fn handle_pcap_trigger(&self, trigger: crate::proto::PcapTrigger, ctx: &mut ws::WebsocketContext<Self>) {
        let now = crate::pcap::wall_now();
        if let Err(e) = self.engine.pcap.trigger(now) {
            debug!(self.log, "pcap trigger rejected"; "error" => %e);
            send(
                ctx,
                &self.log,
                &ServerMsg::Error(ErrorMsg {
                    code: "pcap_trigger_failed".into(),
                    message: e.to_string(),
                }),
            );
            return;
        }
        send(ctx, &self.log, &ServerMsg::PcapTrigger(trigger));
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.engine.session_connected();
        self.send_initial_state(ctx);
        ctx.run_interval(TICK_INTERVAL, |this, ctx| {
            let bus = Arc::clone(&this.engine.bus);
            let log = this.log.clone();
            this.adaptor.drain_into(&bus, |payload| {
                ctx.text(payload);
                true
            });
            if let Some(resolution) = this.adaptor.on_window_tick(&bus) {
                send(ctx, &log, &ServerMsg::Resolution(resolution));
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.adaptor.unsubscribe_all(&self.engine.bus);
        self.engine.session_disconnected();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => ctx.pong(&payload),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Text(text)) => {
                self.fragment_buffer.clear();
                self.handle_text(text.as_ref(), ctx);
            }
            Ok(ws::Message::Continuation(item)) => match item {
                actix_http::ws::Item::FirstText(bytes) => {
                    self.fragment_buffer = String::from_utf8_lossy(&bytes).into_owned();
                }
                actix_http::ws::Item::Continue(bytes) => {
                    self.fragment_buffer.push_str(&String::from_utf8_lossy(&bytes));
                }
                actix_http::ws::Item::Last(bytes) => {
                    self.fragment_buffer.push_str(&String::from_utf8_lossy(&bytes));
                    let text = std::mem::take(&mut self.fragment_buffer);
                    self.handle_text(&text, ctx);
                }
                actix_http::ws::Item::FirstBinary(_) => {}
            },
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Binary(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!(self.log, "websocket protocol error"; "error" => %e);
                ctx.stop();
            }
        }
    }
}

/// Serializes `msg` and writes it as a text frame. Serialization failures
/// are a programmer error (every [`ServerMsg`] variant is constructed from
/// types that always serialize), so this logs rather than panics to keep
/// the connection alive.
fn send(ctx: &mut ws::WebsocketContext<WsSession>, log: &Logger, msg: &ServerMsg) {
    match serde_json::to_string(msg) {
        Ok(text) => send_payload(ctx, text),
        Err(e) => warn!(log, "failed to serialize outbound message"; "error" => %e),
    }
}

/// Threshold above which a deflate-compressed binary frame is considered,
/// per the wire format's "compressed length is at least 10% smaller" rule.
const COMPRESSION_THRESHOLD_BYTES: usize = 1024;
/// Single magic byte prefixing a deflate-compressed binary frame, so the
/// browser client can tell it apart from an uncompressed binary frame.
const COMPRESSED_FRAME_MAGIC: u8 = 0xD0;

/// Sends `payload` as a plain JSON text frame, or as a deflate-compressed
/// binary frame (prefixed with [`COMPRESSED_FRAME_MAGIC`]) when the raw
/// length exceeds [`COMPRESSION_THRESHOLD_BYTES`] and compression saves at
/// least 10%.
fn send_payload(ctx: &mut ws::WebsocketContext<WsSession>, payload: String) {
    if payload.len() < COMPRESSION_THRESHOLD_BYTES {
        ctx.text(payload);
        return;
    }
    use std::io::Write;
    let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    if encoder.write_all(payload.as_bytes()).is_err() {
        ctx.text(payload);
        return;
    }
    match encoder.finish() {
        Ok(compressed) if compressed.len() * 10 <= payload.len() * 9 => {
            let mut framed = Vec::with_capacity(compressed.len() + 1);
            framed.push(COMPRESSED_FRAME_MAGIC);
            framed.extend_from_slice(&compressed);
            ctx.binary(framed);
        }
        _ => ctx.text(payload),
    }
}

/// HTTP upgrade handler wiring a fresh [`WsSession`] to the shared engine.
///
/// # Errors
///
/// Errors if the WebSocket handshake fails, or if the per-session tier
/// subscriptions can't be established because every tier queue's consumer
/// limit has been reached.
pub async fn create_ws(
    request: HttpRequest,
    engine: Data<Arc<Engine>>,
    payload: Payload,
) -> Result<HttpResponse, Error> {
    let log = engine.log.new(o!("component" => "ws_session"));
    let session = WsSession::new(Arc::clone(engine.get_ref()), DEFAULT_MAX_JSON_MSG_LEN, log)
        .map_err(|e| actix_web::error::ErrorServiceUnavailable(e.to_string()))?;
    ws::start(session, &request, payload)
}
