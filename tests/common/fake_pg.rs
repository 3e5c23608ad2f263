// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! A PostgreSQL wire-protocol stub that hangs up on its clients.
//!
//! Speaks just enough of the v3 protocol for `tokio-postgres`: trust auth,
//! simple queries answered with `INSERT 0 1`, then a closed socket after a
//! fixed number of queries per connection.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

const SSL_REQUEST_CODE: i32 = 80877103;

pub struct FakePgServer {
    port: u16,
    accepted: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl FakePgServer {
    /// Serve on an ephemeral port, closing each connection after
    /// `queries_per_connection` queries.
    pub fn start(queries_per_connection: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let queries = Arc::new(Mutex::new(Vec::new()));

        let (count, log) = (accepted.clone(), queries.clone());
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { return };
                count.fetch_add(1, Ordering::SeqCst);
                // A client that misbehaves just loses its connection.
                let _ = serve(stream, queries_per_connection, &log);
            }
        });

        Self { port, accepted, queries }
    }

    pub fn conninfo(&self) -> String {
        format!(
            "host=127.0.0.1 port={} user=postgres dbname=postgres sslmode=disable",
            self.port
        )
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

fn serve(mut stream: TcpStream, max_queries: usize, log: &Mutex<Vec<String>>) -> std::io::Result<()> {
    // Startup, declining SSL if asked.
    loop {
        let body = read_untagged(&mut stream)?;
        let code = i32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        if code == SSL_REQUEST_CODE {
            stream.write_all(b"N")?;
            continue;
        }
        break;
    }
    write_message(&mut stream, b'R', &0i32.to_be_bytes())?;
    write_message(&mut stream, b'Z', b"I")?;

    for _ in 0..max_queries {
        let (tag, body) = read_tagged(&mut stream)?;
        match tag {
            b'Q' => {
                let sql = String::from_utf8_lossy(body.strip_suffix(&[0]).unwrap_or(&body[..])).to_string();
                log.lock().unwrap().push(sql);
                write_message(&mut stream, b'C', b"INSERT 0 1\0")?;
                write_message(&mut stream, b'Z', b"I")?;
            }
            _ => return Ok(()),
        }
    }
    // Dropping the stream closes the socket.
    Ok(())
}

fn read_len(stream: &mut TcpStream) -> std::io::Result<usize> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len)?;
    Ok(i32::from_be_bytes(len) as usize - 4)
}

fn read_untagged(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let len = read_len(stream)?;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body)?;
    Ok(body)
}

fn read_tagged(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let mut tag = [0u8; 1];
    stream.read_exact(&mut tag)?;
    Ok((tag[0], read_untagged(stream)?))
}

fn write_message(stream: &mut TcpStream, tag: u8, body: &[u8]) -> std::io::Result<()> {
    let mut message = Vec::with_capacity(body.len() + 5);
    message.push(tag);
    message.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    message.extend_from_slice(body);
    stream.write_all(&message)
}
