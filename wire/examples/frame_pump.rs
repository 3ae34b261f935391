//! A socket read loop feeding a frame decoder through the byte ring, with
//! replies correlated to pooled futures.
//!
//! Run with `RUST_LOG=debug cargo run --example frame_pump` to see pool misses.

use fibre_wire::future::{Completer, FuturePool};
use fibre_wire::pool::Pool;
use fibre_wire::ring::{self, AsyncRingReader};
use fibre_wire::signal::QueueSignal;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::EnvFilter;

const REQUESTS: u32 = 32;

type Pending = Arc<Mutex<HashMap<u32, Completer<String>>>>;

// Frame: u32 length (big endian), u32 correlation id, UTF-8 body.
fn encode(id: u32, body: &str) -> Vec<u8> {
  let mut frame = Vec::with_capacity(8 + body.len());
  frame.extend_from_slice(&((4 + body.len()) as u32).to_be_bytes());
  frame.extend_from_slice(&id.to_be_bytes());
  frame.extend_from_slice(body.as_bytes());
  frame
}

// Length of the body that follows `header`, or `None` if it cannot hold an id.
fn body_len(header: [u8; 4]) -> Option<usize> {
  let len = u32::from_be_bytes(header) as usize;
  (len >= 4).then_some(len)
}

async fn read_exact(reader: &mut AsyncRingReader, buf: &mut [u8]) -> bool {
  let mut filled = 0;
  while filled < buf.len() {
    let n = reader.read(&mut buf[filled..]).await;
    if n == 0 {
      return false;
    }
    filled += n;
  }
  true
}

async fn decode_loop(mut reader: AsyncRingReader, pending: Pending, bodies: Arc<Pool<Vec<u8>>>) {
  let mut header = [0u8; 4];
  while read_exact(&mut reader, &mut header).await {
    let Some(len) = body_len(header) else {
      println!("[Decoder] Frame too short for a correlation id.");
      break;
    };
    let mut body = bodies.borrow_scoped();
    body.resize(len, 0);
    if !read_exact(&mut reader, &mut body).await {
      break;
    }
    let id = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    let text = String::from_utf8_lossy(&body[4..]).into_owned();
    match pending.lock().remove(&id) {
      Some(completer) => {
        let _ = completer.complete(text);
      }
      None => println!("[Decoder] Reply for unknown id {}", id),
    }
  }
  println!("[Decoder] Stream ended.");
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  // Small on purpose, so the reader thread hits backpressure.
  let (mut writer, reader) = ring::bounded_sync(64);
  let replies = FuturePool::<String>::new(16);
  let bodies = Arc::new(Pool::builder(|| Vec::<u8>::with_capacity(128)).capacity(4).build().unwrap());
  let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
  let go = Arc::new(QueueSignal::new());

  let mut calls = Vec::new();
  for id in 0..REQUESTS {
    let (completer, reply) = replies.rent();
    pending.lock().insert(id, completer);
    calls.push((id, reply));
  }

  let socket = {
    let go = go.clone();
    thread::spawn(move || {
      go.wait();
      // Replies arrive out of order, as they would from a busy broker.
      for id in (0..REQUESTS).rev() {
        let frame = encode(id, &format!("basic.get-ok #{}", id));
        if writer.write(&frame).is_err() {
          println!("[Socket] Decoder went away.");
          return;
        }
      }
      println!("[Socket] All frames written.");
    })
  };

  let decoder = tokio::spawn(decode_loop(reader.to_async(), pending.clone(), bodies.clone()));
  go.set();

  for (id, reply) in calls {
    match reply.await {
      Ok(text) => println!("[Caller {}] {}", id, text),
      Err(e) => println!("[Caller {}] failed: {}", id, e),
    }
  }

  socket.join().unwrap();
  decoder.await.unwrap();
  println!(
    "Reply slots parked: {}/{}, body buffers parked: {}/{}",
    replies.available(),
    replies.capacity(),
    bodies.available(),
    bodies.capacity()
  );
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_length_prefix_is_rejected() {
    for len in 0u32..4 {
      assert_eq!(body_len(len.to_be_bytes()), None);
    }
    let frame = encode(9, "ok");
    let header = [frame[0], frame[1], frame[2], frame[3]];
    assert_eq!(body_len(header), Some(6));
  }
}
