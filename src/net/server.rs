use std::fmt::Write as FmtWrite;
use std::fs::OpenOptions;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::combat::dice::Dice;
use crate::config::{DEFAULT_RATE_LIMIT_REQUESTS, DEFAULT_RATE_LIMIT_WINDOW};
use crate::net::framing::{MessageStream, ReceiveOutcome, DEFAULT_MAX_FRAME};
use crate::net::handlers::{dispatch, log_out};
use crate::net::message::{Message, MessageKind, Stage};
use crate::persistence::store::{PlayerSave, SaveStore};
use crate::telemetry::logging;
use crate::world::registry::World;
use crate::world::scheduler::{Scheduler, TaskId};
use crate::world::spawner::{bootstrap_spawners, SPAWN_INTERVAL_TICKS};

static TRACE_COUNTER: AtomicUsize = AtomicUsize::new(1);
const TRACE_ENV: &str = "RAVENFELL_PACKET_TRACE";
const TRACE_MAX_BYTES: usize = 2048;

const ACCEPT_POLL_SLEEP: Duration = Duration::from_millis(50);
const RECEIVE_POLL_TIMEOUT: Duration = Duration::from_millis(250);
const RATE_COOLDOWN_FACTOR: u32 = 2;
const SPAWN_TICK_LENGTH: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct ServerControl {
    shutdown: AtomicBool,
}

impl ServerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct GameServerConfig {
    pub bind_addr: String,
    pub max_frame: usize,
    pub write_timeout: Duration,
    pub rate_limit_requests: usize,
    pub rate_limit_window: Duration,
    pub autosave_interval_seconds: u64,
    pub root: Option<PathBuf>,
}

impl Default for GameServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7190".to_string(),
            max_frame: DEFAULT_MAX_FRAME,
            write_timeout: Duration::from_secs(5),
            rate_limit_requests: DEFAULT_RATE_LIMIT_REQUESTS,
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
            autosave_interval_seconds: 0,
            root: None,
        }
    }
}

/// Sliding-window request cap. Exceeding it earns the caller a cooldown
/// rather than a disconnect.
#[derive(Debug)]
pub struct RequestRateLimiter {
    window_start: Instant,
    window: Duration,
    max_requests: usize,
    requests: usize,
}

impl RequestRateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            window_start: Instant::now(),
            window,
            max_requests,
            requests: 0,
        }
    }

    pub fn check(&mut self) -> Result<(), Duration> {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.requests = 0;
        }
        if self.requests >= self.max_requests {
            return Err(self.window * RATE_COOLDOWN_FACTOR);
        }
        self.requests += 1;
        Ok(())
    }
}

pub fn run_game_server(
    config: GameServerConfig,
    world: Arc<World>,
    store: Arc<SaveStore>,
    control: Arc<ServerControl>,
) -> Result<(), String> {
    let listener = TcpListener::bind(&config.bind_addr)
        .map_err(|err| format!("bind {} failed: {}", config.bind_addr, err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| format!("listener nonblocking failed: {}", err))?;

    logging::log_game(&format!("game server listening on {}", config.bind_addr));
    println!("ravenfell: game server listening on {}", config.bind_addr);

    let _spawn_guard = spawn_spawner_loop(Arc::clone(&world), Arc::clone(&control));
    let _autosave_guard = spawn_autosave_loop(
        &config,
        Arc::clone(&world),
        Arc::clone(&store),
        Arc::clone(&control),
    );

    while control.is_running() {
        match listener.accept() {
            Ok((stream, addr)) => {
                println!("ravenfell: connection from {}", addr);
                logging::log_netload(&format!("connection from {}", addr));
                let config = config.clone();
                let world = Arc::clone(&world);
                let store = Arc::clone(&store);
                let control = Arc::clone(&control);
                thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &config, &world, &store, &control)
                    {
                        logging::log_error(&format!("connection error: {}", err));
                        eprintln!("connection error: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_SLEEP);
            }
            Err(err) => {
                logging::log_error(&format!("accept error: {}", err));
                eprintln!("accept error: {}", err);
            }
        }
    }

    Ok(())
}

/// One worker per connection: receive a message, rate-check, dispatch,
/// reply, until a Kill goes through or the transport dies. A transport
/// failure is an implicit Kill.
pub(crate) fn handle_connection(
    stream: TcpStream,
    config: &GameServerConfig,
    world: &Arc<World>,
    store: &Arc<SaveStore>,
    control: &Arc<ServerControl>,
) -> Result<(), String> {
    let mut trace = PacketTrace::new(config.root.as_ref(), stream.peer_addr().ok());
    let mut messages = MessageStream::new(stream, config.max_frame);
    messages.set_read_timeout(Some(RECEIVE_POLL_TIMEOUT))?;
    messages.set_write_timeout(Some(config.write_timeout))?;

    let mut limiter = RequestRateLimiter::new(config.rate_limit_requests, config.rate_limit_window);
    let mut dice = Dice::from_time();
    let mut session_player: Option<u64> = None;

    let exit_reason = loop {
        if !control.is_running() {
            break Some("server shutting down".to_string());
        }
        let body = match messages.receive() {
            Ok(ReceiveOutcome::Frame(body)) => body,
            Ok(ReceiveOutcome::Timeout) => continue,
            Err(err) => {
                // Dropped connection: treat as an implicit Kill.
                logging::log_netload(&format!("transport closed: {err}"));
                break None;
            }
        };
        if let Some(trace) = trace.as_mut() {
            trace.record("in", &body);
        }

        if let Err(cooldown) = limiter.check() {
            let reply = Message::new(
                0,
                Stage::One,
                MessageKind::Error {
                    text: format!("too many requests; cooling down for {:?}", cooldown),
                },
            );
            send_message(&mut messages, trace.as_mut(), &reply)?;
            thread::sleep(cooldown);
            continue;
        }

        let message = match Message::decode(&body) {
            Ok(message) => message,
            Err(err) => {
                let reply = Message::new(0, Stage::One, MessageKind::Error { text: err.message });
                send_message(&mut messages, trace.as_mut(), &reply)?;
                continue;
            }
        };

        if let MessageKind::Kill { reason } = &message.kind {
            logging::log_game(&format!(
                "kill received from {} ({})",
                message.player_id,
                reason.as_deref().unwrap_or("no reason")
            ));
            let reply = Message::new(
                message.player_id,
                message.stage.next(),
                MessageKind::Kill { reason: None },
            );
            let _ = send_message(&mut messages, trace.as_mut(), &reply);
            break None;
        }

        let now = logging::unix_timestamp().max(0) as u64;
        let reply = dispatch(world, store, &message, &mut dice, now);
        if matches!(message.kind, MessageKind::Authenticate { .. }) {
            if let MessageKind::AccountClientState { snapshot } = &reply.kind {
                session_player = Some(snapshot.player_id);
            }
        }
        send_message(&mut messages, trace.as_mut(), &reply)?;
    };

    if let Some(player_id) = session_player {
        log_out(world, store, player_id);
    }
    if let Some(reason) = exit_reason {
        // Best effort: the peer may already be gone.
        let farewell = Message::new(
            session_player.unwrap_or(0),
            Stage::One,
            MessageKind::Kill {
                reason: Some(reason),
            },
        );
        let _ = send_message(&mut messages, trace.as_mut(), &farewell);
    }
    Ok(())
}

fn send_message(
    messages: &mut MessageStream,
    trace: Option<&mut PacketTrace>,
    message: &Message,
) -> Result<(), String> {
    let body = message.encode();
    if let Some(trace) = trace {
        trace.record("out", &body);
    }
    messages.send(&body)
}

struct JoinOnDrop {
    handle: Option<thread::JoinHandle<()>>,
}

impl Drop for JoinOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawner timers run on their own thread against the shared registry;
/// the scheduler itself is tick-driven so tests can advance it without a
/// clock.
fn spawn_spawner_loop(world: Arc<World>, control: Arc<ServerControl>) -> JoinOnDrop {
    let handle = thread::spawn(move || {
        let mut spawners = bootstrap_spawners();
        let mut scheduler = Scheduler::new();
        let mut dice = Dice::from_time();
        for spawner in &spawners {
            scheduler.arm(TaskId(spawner.tag), SPAWN_INTERVAL_TICKS);
        }
        while control.is_running() {
            thread::sleep(SPAWN_TICK_LENGTH);
            let now = logging::unix_timestamp().max(0) as u64;
            for task in scheduler.advance(1) {
                if let Some(spawner) = spawners.iter_mut().find(|spawner| spawner.tag == task.0) {
                    let added = spawner.tick(&world, &mut dice, now);
                    for serial in &added {
                        if let Some(creature) = world.mobile(*serial) {
                            logging::log_spawn(&format!(
                                "spawner {} placed {} [{}] in {}",
                                spawner.tag, creature.name, serial, creature.region
                            ));
                        }
                    }
                    scheduler.arm(task, SPAWN_INTERVAL_TICKS);
                }
            }
        }
    });
    JoinOnDrop {
        handle: Some(handle),
    }
}

fn spawn_autosave_loop(
    config: &GameServerConfig,
    world: Arc<World>,
    store: Arc<SaveStore>,
    control: Arc<ServerControl>,
) -> Option<JoinOnDrop> {
    let interval = config.autosave_interval_seconds;
    if interval == 0 {
        return None;
    }
    let handle = thread::spawn(move || {
        let mut last_save = Instant::now();
        while control.is_running() {
            thread::sleep(Duration::from_millis(250));
            if last_save.elapsed() < Duration::from_secs(interval) {
                continue;
            }
            last_save = Instant::now();
            let mut saved = 0usize;
            for player_id in world.session_ids() {
                let Some(session) = world.session(player_id) else {
                    continue;
                };
                let Some(mobile) = world.mobile(session.mobile) else {
                    continue;
                };
                if !mobile.is_logged_in() {
                    continue;
                }
                let save = PlayerSave::capture(&world, player_id, &mobile);
                match save.to_blob() {
                    Ok(blob) => match store.save_blob(player_id, &blob) {
                        Ok(()) => saved += 1,
                        Err(err) => logging::log_error(&format!(
                            "autosave write failed for {player_id}: {err}"
                        )),
                    },
                    Err(err) => logging::log_error(&format!(
                        "autosave serialize failed for {player_id}: {err}"
                    )),
                }
            }
            if saved > 0 {
                logging::log_game(&format!("autosave flushed {saved} players"));
            }
        }
    });
    Some(JoinOnDrop {
        handle: Some(handle),
    })
}

struct PacketTrace {
    file: std::fs::File,
}

impl PacketTrace {
    fn new(root: Option<&PathBuf>, peer: Option<std::net::SocketAddr>) -> Option<Self> {
        if !trace_enabled() {
            return None;
        }
        let root = root?;
        let id = TRACE_COUNTER.fetch_add(1, Ordering::SeqCst);
        let file_name = format!("packet_trace_{id}.log");
        let path = root.join("log").join(file_name);
        let mut file = OpenOptions::new().create(true).append(true).open(path).ok()?;
        let peer = peer
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let _ = writeln!(file, "# packet trace {id} peer={peer}");
        Some(Self { file })
    }

    fn record(&mut self, direction: &str, body: &[u8]) {
        let len = body.len();
        let max = TRACE_MAX_BYTES.min(len);
        let mut line = String::with_capacity(32 + max * 3);
        let _ = write!(line, "{direction} len={len}");
        if len > TRACE_MAX_BYTES {
            let _ = write!(line, " trunc={}", len - TRACE_MAX_BYTES);
        }
        line.push_str(" data=");
        for (index, byte) in body[..max].iter().enumerate() {
            if index > 0 {
                line.push(' ');
            }
            let _ = write!(line, "{byte:02x}");
        }
        line.push('\n');
        let _ = self.file.write_all(line.as_bytes());
        let _ = self.file.flush();
    }
}

fn trace_enabled() -> bool {
    match std::env::var(TRACE_ENV) {
        Ok(value) => {
            let value = value.trim().to_ascii_lowercase();
            !value.is_empty() && value != "0" && value != "false" && value != "off"
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    static TEST_DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn scratch_store() -> SaveStore {
        let id = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        SaveStore::new(std::env::temp_dir().join(format!(
            "ravenfell_server_test_{}_{}",
            std::process::id(),
            id
        )))
    }

    #[test]
    fn rate_limiter_caps_a_window_then_recovers() {
        let mut limiter = RequestRateLimiter::new(3, Duration::from_millis(20));
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        let cooldown = limiter.check().expect_err("fourth request must be capped");
        assert_eq!(cooldown, Duration::from_millis(20) * RATE_COOLDOWN_FACTOR);

        thread::sleep(Duration::from_millis(25));
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn connection_loop_serves_a_session_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");

        let world = Arc::new(World::bootstrap());
        let store = Arc::new(scratch_store());
        let control = Arc::new(ServerControl::new());

        let server_world = Arc::clone(&world);
        let server_store = Arc::clone(&store);
        let server_control = Arc::clone(&control);
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let config = GameServerConfig::default();
            handle_connection(stream, &config, &server_world, &server_store, &server_control)
        });

        let stream = TcpStream::connect(addr).expect("connect");
        let mut messages = MessageStream::new(stream, DEFAULT_MAX_FRAME);

        let auth = Message::request(
            0,
            MessageKind::Authenticate {
                player_id: 9009,
                name: "Tamsin".to_string(),
            },
        );
        messages.send(&auth.encode()).expect("send auth");
        let reply = match messages.receive().expect("auth reply") {
            ReceiveOutcome::Frame(body) => Message::decode(&body).expect("decode"),
            ReceiveOutcome::Timeout => panic!("timeout"),
        };
        assert_eq!(reply.stage, Stage::Two);
        assert!(matches!(reply.kind, MessageKind::AccountClientState { .. }));

        // A malformed frame earns an Error, not a disconnect.
        messages.send(&[0xff, 0x00, 0x01]).expect("send junk");
        let reply = match messages.receive().expect("error reply") {
            ReceiveOutcome::Frame(body) => Message::decode(&body).expect("decode"),
            ReceiveOutcome::Timeout => panic!("timeout"),
        };
        assert!(matches!(reply.kind, MessageKind::Error { .. }));

        let kill = Message::request(9009, MessageKind::Kill { reason: None });
        messages.send(&kill.encode()).expect("send kill");
        let reply = match messages.receive().expect("kill reply") {
            ReceiveOutcome::Frame(body) => Message::decode(&body).expect("decode"),
            ReceiveOutcome::Timeout => panic!("timeout"),
        };
        assert!(matches!(reply.kind, MessageKind::Kill { .. }));

        server.join().expect("server thread").expect("clean exit");
        // The kill logged the player out and wrote a save.
        let session = world.session(9009).expect("session kept");
        assert!(!world.mobile(session.mobile).expect("mobile").is_logged_in());
        assert!(store.load_blob(9009).expect("load").is_some());
    }
}
