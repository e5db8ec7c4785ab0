//! Live CAN signal-value database: parses a DBC file, then runs a
//! background receive worker that decodes matching frames into per-signal
//! slots and tracks per-message freshness deadlines.
//!
//! Grounded in `lib/can_database/can_database.c`
//! (`canDatabaseRxThreadEntrypoint`, `canDatabaseCheckTimeouts`,
//! `canDatabaseGetUint32/Int32/Float/Bool`). The worker is a plain OS
//! thread with an `Arc<AtomicBool>` shutdown flag (Design Notes §9
//! "Background worker"), and the shared slots are guarded by a single
//! mutex rather than per-slot atomics — simpler than the lock-free
//! alternative the design notes allow for, and still preserves the
//! ordering guarantee of §5 (validity is set after the signal slots, under
//! the same lock acquisition).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::dbc::{DbcFile, Message, ParseError};
use crate::device::{CanDevice, DeviceError};
use crate::signal::{self, Signal};
use thiserror::Error;

/// `100 ms`: the receive timeout the worker configures on its device so the
/// deadline sweep ticks regularly even with no traffic.
pub const WORKER_RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);
/// Default per-message freshness window.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(2);

const SENTINEL: usize = usize::MAX;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("DBC parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

/// Three-valued read result, named per §4.5's read API.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalState<T> {
    Missing,
    Timeout,
    Valid(T),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalIndex(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageIndex(usize);

struct SharedState {
    values: Vec<f32>,
    valid: Vec<bool>,
    deadlines: Vec<Instant>,
}

pub struct Database {
    messages: Arc<Vec<Message>>,
    signals: Arc<Vec<Signal>>,
    state: Arc<Mutex<SharedState>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Database {
    /// Parses `dbc_path`, configures `device` with the worker's receive
    /// timeout, then starts the background receive worker with every
    /// message marked invalid.
    pub fn new(
        mut device: Box<dyn CanDevice>,
        dbc_path: &str,
        message_timeout: Duration,
    ) -> Result<Self, DatabaseError> {
        let file = DbcFile::load(dbc_path)?;
        device.set_timeout(WORKER_RECEIVE_TIMEOUT.as_millis() as u32)?;

        let message_count = file.messages.len();
        let signal_count = file.signals.len();
        let now = Instant::now();

        let messages = Arc::new(file.messages);
        let signals = Arc::new(file.signals);
        let state = Arc::new(Mutex::new(SharedState {
            values: vec![0.0; signal_count],
            valid: vec![false; message_count],
            deadlines: vec![now; message_count],
        }));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let messages = Arc::clone(&messages);
            let signals = Arc::clone(&signals);
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                worker_loop(device, messages, signals, state, stop, message_timeout)
            })
        };

        Ok(Self {
            messages,
            signals,
            state,
            stop,
            worker: Some(worker),
        })
    }

    pub fn lookup_message(&self, name: &str) -> MessageIndex {
        MessageIndex(
            self.messages
                .iter()
                .position(|m| m.name == name)
                .unwrap_or(SENTINEL),
        )
    }

    pub fn lookup_signal(&self, name: &str) -> SignalIndex {
        SignalIndex(
            self.signals
                .iter()
                .position(|s| s.name == name)
                .unwrap_or(SENTINEL),
        )
    }

    pub fn is_message_valid(&self, index: MessageIndex) -> SignalState<bool> {
        if index.0 == SENTINEL {
            return SignalState::Missing;
        }
        let state = self.state.lock().unwrap();
        SignalState::Valid(state.valid[index.0])
    }

    fn read_raw(&self, index: SignalIndex) -> SignalState<f32> {
        if index.0 == SENTINEL {
            return SignalState::Missing;
        }
        let message_index = self.signals[index.0].message_index;
        let state = self.state.lock().unwrap();
        if !state.valid[message_index] {
            return SignalState::Timeout;
        }
        SignalState::Valid(state.values[index.0])
    }

    pub fn read_f32(&self, index: SignalIndex) -> SignalState<f32> {
        self.read_raw(index)
    }

    pub fn read_u32(&self, index: SignalIndex) -> SignalState<u32> {
        match self.read_raw(index) {
            SignalState::Valid(v) => SignalState::Valid(v as u32),
            SignalState::Timeout => SignalState::Timeout,
            SignalState::Missing => SignalState::Missing,
        }
    }

    pub fn read_i32(&self, index: SignalIndex) -> SignalState<i32> {
        match self.read_raw(index) {
            SignalState::Valid(v) => SignalState::Valid(v as i32),
            SignalState::Timeout => SignalState::Timeout,
            SignalState::Missing => SignalState::Missing,
        }
    }

    pub fn read_bool(&self, index: SignalIndex) -> SignalState<bool> {
        match self.read_raw(index) {
            SignalState::Valid(v) => SignalState::Valid(v.abs() > f32::EPSILON),
            SignalState::Timeout => SignalState::Timeout,
            SignalState::Missing => SignalState::Missing,
        }
    }

    /// Signals the worker to stop after its current receive attempt and
    /// joins it. Called automatically by `Drop`.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    device: Box<dyn CanDevice>,
    messages: Arc<Vec<Message>>,
    signals: Arc<Vec<Signal>>,
    state: Arc<Mutex<SharedState>>,
    stop: Arc<AtomicBool>,
    message_timeout: Duration,
) {
    while !stop.load(Ordering::Relaxed) {
        let received = device.receive();
        sweep_deadlines(&messages, &state);

        let frame = match received {
            Ok(frame) => frame,
            Err(_) => continue,
        };

        let message_index = match messages
            .iter()
            .position(|m| m.id == frame.id() && m.extended == frame.is_extended())
        {
            Some(i) => i,
            None => continue,
        };

        let payload = frame.payload_word();
        let message = &messages[message_index];

        let mut state = state.lock().unwrap();
        for sig_index in message.signal_indices() {
            let sig = &signals[sig_index];
            state.values[sig_index] = signal::decode(sig, payload) as f32;
        }
        state.valid[message_index] = true;
        state.deadlines[message_index] = Instant::now() + message_timeout;
    }
}

/// Expires any message whose freshness deadline has passed, independent of
/// whether this tick's receive attempt produced a frame — run unconditionally
/// on every worker iteration, per the deadline-sweep ordering in §4.5.
fn sweep_deadlines(messages: &Arc<Vec<Message>>, state: &Arc<Mutex<SharedState>>) {
    let now = Instant::now();
    let mut state = state.lock().unwrap();
    for i in 0..messages.len() {
        if state.valid[i] && now >= state.deadlines[i] {
            state.valid[i] = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use crate::frame::Frame;
    use std::sync::mpsc::{Receiver, Sender};

    struct ChannelDevice {
        rx: Mutex<Receiver<Frame>>,
    }

    impl CanDevice for ChannelDevice {
        fn transmit(&self, _frame: &Frame) -> Result<(), DeviceError> {
            Ok(())
        }
        fn receive(&self) -> Result<Frame, DeviceError> {
            self.rx
                .lock()
                .unwrap()
                .recv_timeout(WORKER_RECEIVE_TIMEOUT)
                .map_err(|_| DeviceError::Timeout)
        }
        fn flush_rx(&self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn set_timeout(&self, _millis: u32) -> Result<(), DeviceError> {
            Ok(())
        }
        fn baudrate(&self) -> Option<u32> {
            None
        }
        fn device_name(&self) -> &str {
            "test"
        }
        fn device_type(&self) -> &str {
            "test"
        }
        fn close(&mut self) {}
    }

    fn harness() -> (Sender<Frame>, Database) {
        let (tx, rx) = std::sync::mpsc::channel();
        let device: Box<dyn CanDevice> = Box::new(ChannelDevice { rx: Mutex::new(rx) });

        let dir = std::env::temp_dir().join(format!("db_test_{}.dbc", std::process::id()));
        std::fs::write(
            &dir,
            "BO_ 291 Example: 8 Vector__XXX\n SG_ Voltage : 0|16@1+ (0.01,0) [0|655.35] \"V\" Vector__XXX\n",
        )
        .unwrap();

        let database = Database::new(device, dir.to_str().unwrap(), Duration::from_millis(200)).unwrap();
        (tx, database)
    }

    #[test]
    fn missing_signal_reads_as_missing() {
        let (_tx, database) = harness();
        let idx = database.lookup_signal("DoesNotExist");
        assert_eq!(database.read_f32(idx), SignalState::Missing);
    }
}
