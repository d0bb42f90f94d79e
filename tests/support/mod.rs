#![allow(dead_code)] // each test binary uses a different subset of the helpers

//! In-process mock relay board for integration tests.
//!
//! Speaks just enough Modbus/TCP for the controller: echoes Write Single
//! Coil requests byte-for-byte (applying on/off/toggle to its coil bank),
//! answers Read Coils with a packed bit field, and returns exception 0x02
//! for any address past its last coil.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct MockBoard {
    pub addr: SocketAddr,
    coils: Arc<Mutex<Vec<bool>>>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    request_count: Arc<AtomicUsize>,
}

impl MockBoard {
    /// `host:port` string as the controller expects it.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Raw frames received so far, in arrival order.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Overwrite the coil bank.
    pub fn set_coils(&self, states: &[bool]) {
        let mut coils = self.coils.lock().unwrap();
        assert_eq!(coils.len(), states.len());
        coils.copy_from_slice(states);
    }

    /// Current coil states.
    pub fn coils(&self) -> Vec<bool> {
        self.coils.lock().unwrap().clone()
    }
}

/// Spawn a board with `coil_count` relays, all off.
pub async fn spawn_board(coil_count: u16) -> MockBoard {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let coils = Arc::new(Mutex::new(vec![false; coil_count as usize]));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let request_count = Arc::new(AtomicUsize::new(0));

    let board = MockBoard {
        addr,
        coils: coils.clone(),
        requests: requests.clone(),
        request_count: request_count.clone(),
    };

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let coils = coils.clone();
            let requests = requests.clone();
            let request_count = request_count.clone();
            tokio::spawn(async move {
                let _ = serve_connection(stream, coils, requests, request_count).await;
            });
        }
    });

    board
}

async fn serve_connection(
    mut stream: TcpStream,
    coils: Arc<Mutex<Vec<bool>>>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    request_count: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    loop {
        let mut header = [0u8; 7];
        if stream.read_exact(&mut header).await.is_err() {
            return Ok(()); // peer closed
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut payload = vec![0u8; length.saturating_sub(1)];
        stream.read_exact(&mut payload).await?;

        let mut frame = header.to_vec();
        frame.extend_from_slice(&payload);
        requests.lock().unwrap().push(frame.clone());
        request_count.fetch_add(1, Ordering::SeqCst);

        let reply = build_reply(&header, &payload, &coils);
        stream.write_all(&reply).await?;
    }
}

fn build_reply(header: &[u8; 7], payload: &[u8], coils: &Arc<Mutex<Vec<bool>>>) -> Vec<u8> {
    let function = payload[0];
    match function {
        // Write Single Coil: apply, then echo the whole request.
        0x05 => {
            let address = u16::from_be_bytes([payload[1], payload[2]]) as usize;
            let value = u16::from_be_bytes([payload[3], payload[4]]);
            let mut bank = coils.lock().unwrap();
            if address >= bank.len() {
                return exception_reply(header, function, 0x02);
            }
            match value {
                0xFF00 => bank[address] = true,
                0x0000 => bank[address] = false,
                0x5500 => bank[address] = !bank[address],
                _ => return exception_reply(header, function, 0x03),
            }
            let mut echo = header.to_vec();
            echo.extend_from_slice(payload);
            echo
        }
        // Read Coils: packed bit field, LSB first within each byte.
        0x01 => {
            let start = u16::from_be_bytes([payload[1], payload[2]]) as usize;
            let quantity = u16::from_be_bytes([payload[3], payload[4]]) as usize;
            let bank = coils.lock().unwrap();
            if quantity == 0 || start + quantity > bank.len() {
                return exception_reply(header, function, 0x02);
            }

            let byte_count = quantity.div_ceil(8);
            let mut body = vec![0x01, byte_count as u8];
            body.extend(std::iter::repeat(0u8).take(byte_count));
            for i in 0..quantity {
                if bank[start + i] {
                    body[2 + i / 8] |= 1 << (i % 8);
                }
            }
            reply_frame(header, &body)
        }
        _ => exception_reply(header, function, 0x01),
    }
}

fn reply_frame(request_header: &[u8; 7], payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(7 + payload.len());
    frame.extend_from_slice(&request_header[0..2]); // transaction ID echoed
    frame.extend_from_slice(&[0x00, 0x00]); // protocol ID
    frame.extend_from_slice(&((payload.len() as u16 + 1).to_be_bytes()));
    frame.push(0x01); // unit ID
    frame.extend_from_slice(payload);
    frame
}

fn exception_reply(request_header: &[u8; 7], function: u8, code: u8) -> Vec<u8> {
    reply_frame(request_header, &[function | 0x80, code])
}
