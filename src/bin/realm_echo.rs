//! Echo server over the realm-core substrate.
//!
//! Boots two modules (a session record owner and an echo module that
//! attaches per-session counters), accepts TCP connections and echoes every
//! valid chat frame back with the server tick stamped into its header.
//!
//! Run with: `cargo run --bin realm_echo -- [config.toml]`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use realm_core::config::CoreConfig;
use realm_core::core::{drain_frames, FieldType, FieldValue, FlagWidth, Header, Message, Schema};
use realm_core::error::{CoreError, Result};
use realm_core::module::{get_attached_data_mut, AttachmentKey, Hooks, Module, ModuleRegistry, Record};
use realm_core::transport::{ConnEventKind, ConnectionId, TcpServer};
use realm_core::utils::logging::init_logging;
use realm_core::utils::{PacketBufferPool, RingBuffer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SESSION_MODULE: &str = "session";
const ECHO_MODULE: &str = "echo";

/// Record kind owned by the session module.
const SESSION_RECORD: u32 = 0;

/// Callback on the session module, fired for every decoded frame.
const CB_FRAME: u32 = 0;

const MSG_CHAT: u8 = 1;

const TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct Session {
    frames: u64,
}

#[derive(Debug, Default)]
struct EchoStats {
    echoed: u64,
    bytes: u64,
}

#[derive(Default)]
struct EchoState {
    stats_key: Option<AttachmentKey<EchoStats>>,
}

/// Event passed to `CB_FRAME` subscribers.
struct FrameEvent {
    msg_type: u8,
    len: usize,
}

struct Peer {
    record: Record,
    pending: BytesMut,
}

fn chat_schema() -> Result<Schema> {
    Schema::builder(FlagWidth::One)
        .scalar(FieldType::UInt32)
        .field(FieldType::Char, 64)
        .memory_block()
        .build()
}

fn build_modules() -> Result<Vec<Module>> {
    let session = Module::create::<()>(
        SESSION_MODULE,
        Hooks::new()
            .on_register(|m, _| {
                m.set_record_layout(SESSION_RECORD, Session::default, |_: &mut Session| {})
            })
            .on_shutdown(|m| info!(module = %m.name(), "Session module stopped")),
    )?;

    let echo = Module::create::<EchoState>(
        ECHO_MODULE,
        Hooks::new()
            .on_register(|m, registry| {
                let owner = registry.lookup(SESSION_MODULE)?;
                let key = owner.attach_data(
                    SESSION_RECORD,
                    m.name(),
                    EchoStats::default,
                    |stats: &mut EchoStats| {
                        debug!(echoed = stats.echoed, bytes = stats.bytes, "Session echo totals");
                    },
                )?;
                m.with_state(|state: &mut EchoState| state.stats_key = Some(key))?;
                owner.add_callback(CB_FRAME, m.name(), |event: &mut FrameEvent| {
                    event.msg_type == MSG_CHAT && event.len > 0
                })?;
                Ok(())
            })
            .on_initialize(|m| {
                info!(module = %m.name(), "Echo module ready");
                Ok(())
            }),
    )?
    .with_dependencies(&[SESSION_MODULE]);

    Ok(vec![echo, session])
}

struct EchoApp {
    server: TcpServer,
    session: Arc<Module>,
    stats_key: AttachmentKey<EchoStats>,
    schema: Schema,
    pool: PacketBufferPool,
    peers: HashMap<ConnectionId, Peer>,
    tick: u32,
}

impl EchoApp {
    fn poll_connections(&mut self) {
        let mut events = Vec::new();
        self.server.poll_conn(&mut events, 64);
        for event in events {
            match event.kind {
                ConnEventKind::Connected => match self.session.create_record(SESSION_RECORD) {
                    Ok(record) => {
                        info!(id = %event.id, addr = %event.addr, "Client connected");
                        self.peers.insert(
                            event.id,
                            Peer {
                                record,
                                pending: BytesMut::new(),
                            },
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to create session record");
                        self.server.disconnect(event.id);
                    }
                },
                ConnEventKind::Disconnected => {
                    info!(id = %event.id, addr = %event.addr, "Client disconnected");
                    if let Some(peer) = self.peers.remove(&event.id) {
                        if let Err(e) = self.session.destroy_record(peer.record) {
                            warn!(error = %e, "Failed to destroy session record");
                        }
                    }
                }
            }
        }
    }

    fn poll_receives(&mut self) {
        for event in self.server.poll_recv() {
            if let Some(peer) = self.peers.get_mut(&event.id) {
                peer.pending.extend_from_slice(&event.data);
            }
            let id = event.id;
            self.server.free_recv(event);
            self.process(id);
        }
    }

    fn process(&mut self, id: ConnectionId) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        let mut frames = Vec::new();
        if let Err(e) = drain_frames(&mut peer.pending, &mut frames) {
            debug!(%id, error = %e, "Stream desynchronised, disconnecting");
            self.server.disconnect(id);
        }

        let mut out = RingBuffer::new(frames.iter().map(|f| f.len()).sum::<usize>().max(1));
        for frame in &frames {
            // Malformed frames are dropped without a reply.
            let Ok(decoded) = self.schema.decode_top_level(frame) else {
                continue;
            };
            let Some(header) = decoded.header().copied() else {
                continue;
            };
            let mut event = FrameEvent {
                msg_type: header.msg_type,
                len: frame.len(),
            };
            if !self.session.enum_callback(CB_FRAME, &mut event) {
                debug!(%id, msg_type = header.msg_type, "Frame vetoed");
                continue;
            }

            let mut reply = Message::new(&self.schema);
            reply.set_opt(0, decoded.get::<u32>(0));
            if let Some(text) = decoded.chars(1) {
                reply.set(1, FieldValue::raw(text));
            }
            if let Some(block) = decoded.block(2) {
                reply.set(2, FieldValue::block(block));
            }
            let reply_header = Header {
                owner_id: id.slot(),
                frame_tick: self.tick,
                ..header
            };
            let mut buf = self.pool.acquire();
            match buf.encode_top_level(&reply, reply_header) {
                Ok(bytes) => {
                    if !out.write_all(bytes) {
                        let mut grown = RingBuffer::new((out.capacity() + bytes.len()) * 2);
                        grown.consume_other(&mut out);
                        grown.write(bytes);
                        out = grown;
                    }
                }
                Err(e) => {
                    warn!(%id, error = %e, "Failed to encode reply");
                    continue;
                }
            }

            if let Some(session) = peer.record.base_mut::<Session>() {
                session.frames += 1;
            }
            if let Some(stats) = get_attached_data_mut(&mut peer.record, self.stats_key) {
                stats.echoed += 1;
                stats.bytes += frame.len() as u64;
            }
        }
        self.server.consume_send(id, out);
    }

    fn run_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        self.poll_connections();
        self.poll_receives();
    }
}

fn load_config() -> Result<CoreConfig> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => CoreConfig::from_file(path)?,
        None => CoreConfig::default(),
    };
    config.apply_env()?;
    config.validate_strict()?;
    Ok(config)
}

fn main() -> Result<()> {
    let config = load_config()?;
    init_logging(&config.logging)?;

    let registry = ModuleRegistry::boot(build_modules()?)?;
    let session = registry.lookup(SESSION_MODULE)?;
    let stats_key = registry
        .lookup(ECHO_MODULE)?
        .with_state(|state: &mut EchoState| state.stats_key)?
        .ok_or(CoreError::Wiring("echo module did not attach"))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("realm-io")
        .build()?;

    let server = TcpServer::from_config(&config.server)?;
    server.spawn_tasks(runtime.handle())?;
    info!(addr = %server.local_addr(), "Echo server listening");

    let stop = CancellationToken::new();
    let signal_stop = stop.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
        }
        signal_stop.cancel();
    });

    let mut app = EchoApp {
        server,
        session,
        stats_key,
        schema: chat_schema()?,
        pool: PacketBufferPool::with_capacity(config.packet.pool_buffers, config.packet.buffer_capacity),
        peers: HashMap::new(),
        tick: 0,
    };

    while !stop.is_cancelled() {
        app.run_tick();
        if app.tick % 1200 == 0 {
            app.server.metrics().log_metrics();
        }
        std::thread::sleep(TICK);
    }

    registry.close_all();
    for (_, peer) in app.peers.drain() {
        if let Err(e) = app.session.destroy_record(peer.record) {
            warn!(error = %e, "Failed to destroy session record");
        }
    }
    registry.shutdown_all();
    app.server.shutdown();
    runtime.shutdown_timeout(config.server.shutdown_grace);
    registry.destroy();
    info!("Echo server stopped");
    Ok(())
}
