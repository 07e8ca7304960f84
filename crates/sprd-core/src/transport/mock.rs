//! Mock serial transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{SerialTransport, TransportError};
use crate::protocol::{self, BSL_REP_ACK};

/// Mock transport for unit testing client logic.
pub struct MockTransport {
    /// Queued response buffers to return on read, in order.
    response_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Whether the port is "open".
    open: Arc<Mutex<bool>>,
    /// Last baud rate requested.
    baud: Arc<Mutex<u32>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            response_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            open: Arc::new(Mutex::new(true)),
            baud: Arc::new(Mutex::new(115_200)),
        }
    }

    /// Queue a raw response buffer to be returned on the next read.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.response_queue.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Queue an encoded FDL2 frame carrying the given status code.
    pub fn queue_status(&self, status: u16) {
        self.queue_response(&protocol::encode_hdlc(status, &[], false));
    }

    /// Queue a plain ACK frame.
    pub fn queue_ack(&self) {
        self.queue_status(BSL_REP_ACK as u16);
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Last baud rate set on the port.
    pub fn current_baud(&self) -> u32 {
        *self.baud.lock().unwrap()
    }

    /// Simulate the device vanishing mid-operation.
    pub fn drop_port(&self) {
        *self.open.lock().unwrap() = false;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport for MockTransport {
    fn open(&mut self, _path: &str, baud: u32) -> Result<(), TransportError> {
        *self.open.lock().unwrap() = true;
        *self.baud.lock().unwrap() = baud;
        Ok(())
    }

    fn read(&mut self, _max_len: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !*self.open.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        // Empty buffer on an exhausted queue mimics a timeout expiry.
        Ok(self
            .response_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !*self.open.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError> {
        if !*self.open.lock().unwrap() {
            return Err(TransportError::NotOpen);
        }
        *self.baud.lock().unwrap() = baud;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn close(&mut self) {
        *self.open.lock().unwrap() = false;
    }

    fn is_open(&self) -> bool {
        *self.open.lock().unwrap()
    }
}
