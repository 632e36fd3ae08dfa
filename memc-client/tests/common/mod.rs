#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use memc_client::{CacheClient, Protocol};
use memc_common::{Opcode, ResponseHeader, Status, HEADER_SIZE, REQUEST_MAGIC};

/// Key that makes the mock answer with garbage framing.
pub const POISON_KEY: &str = "poison";

/// First CAS value handed out; every byte differs so byte-order bugs show.
const CAS_BASE: u64 = 0x0102_0304_0506_0700;

#[derive(Debug, Clone)]
pub struct Entry {
    pub data: Vec<u8>,
    pub flags: u32,
    pub exptime: u32,
    pub cas: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<Vec<u8>, Entry>,
    next_cas: u64,
    last_request_cas: Option<u64>,
}

impl State {
    fn bump_cas(&mut self) -> u64 {
        self.next_cas += 1;
        CAS_BASE + self.next_cas
    }
}

/// In-process cache server speaking one protocol from an in-memory map.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    accepted: Arc<AtomicUsize>,
}

impl MockServer {
    pub fn spawn(protocol: Protocol) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let state = Arc::new(Mutex::new(State::default()));
        let accepted = Arc::new(AtomicUsize::new(0));

        let thread_state = state.clone();
        let thread_accepted = accepted.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };
                thread_accepted.fetch_add(1, Ordering::SeqCst);
                let state = thread_state.clone();
                thread::spawn(move || {
                    let _ = match protocol {
                        Protocol::Textual => serve_text(stream, state),
                        Protocol::Binary => serve_binary(stream, state),
                    };
                });
            }
        });

        MockServer {
            addr,
            state,
            accepted,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of TCP connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn insert(&self, key: &[u8], data: &[u8], flags: u32) -> u64 {
        let mut state = self.state.lock().expect("state");
        let cas = state.bump_cas();
        state.entries.insert(
            key.to_vec(),
            Entry {
                data: data.to_vec(),
                flags,
                exptime: 0,
                cas,
            },
        );
        cas
    }

    pub fn entry(&self, key: &[u8]) -> Option<Entry> {
        self.state.lock().expect("state").entries.get(key).cloned()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entry(key).is_some()
    }

    /// CAS token carried by the most recent binary store request.
    pub fn last_request_cas(&self) -> Option<u64> {
        self.state.lock().expect("state").last_request_cas
    }
}

/// Server that runs a fixed script on every accepted connection.
pub struct ScriptedServer {
    port: u16,
    accepted: Arc<AtomicUsize>,
}

impl ScriptedServer {
    pub fn spawn<F>(script: F) -> ScriptedServer
    where
        F: Fn(&mut TcpStream) -> std::io::Result<()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let thread_accepted = accepted.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };
                thread_accepted.fetch_add(1, Ordering::SeqCst);
                let _ = stream.set_nodelay(true);
                let _ = script(&mut stream);
            }
        });
        ScriptedServer { port, accepted }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Reads one CRLF-terminated request line plus `extra` following bytes.
pub fn read_text_request(stream: &mut TcpStream, extra: usize) -> std::io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while !line.ends_with(b"\r\n") {
        stream.read_exact(&mut byte)?;
        line.push(byte[0]);
    }
    let mut tail = vec![0u8; extra];
    stream.read_exact(&mut tail)?;
    line.extend_from_slice(&tail);
    Ok(line)
}

/// Reads one binary request; returns its opcode and key.
pub fn read_binary_request(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header)?;
    let key_len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let extras_len = header[4] as usize;
    let body_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body)?;
    Ok((header[1], body[extras_len..extras_len + key_len].to_vec()))
}

/// Writes a binary response: header, extras, then value.
pub fn write_binary_response(
    stream: &mut TcpStream,
    opcode: u8,
    status: u16,
    cas: u64,
    extras: &[u8],
    value: &[u8],
) -> std::io::Result<()> {
    let header = ResponseHeader {
        opcode,
        key_len: 0,
        extras_len: extras.len() as u8,
        data_type: 0,
        status,
        body_len: (extras.len() + value.len()) as u32,
        opaque: 0,
        cas,
    };
    let mut out = header.encode().to_vec();
    out.extend_from_slice(extras);
    out.extend_from_slice(value);
    stream.write_all(&out)
}

/// Builds a client connected to a single mock server.
pub fn client_for(server: &MockServer, protocol: Protocol) -> CacheClient {
    let mut client = CacheClient::new(protocol);
    client
        .add_connection("127.0.0.1", server.port())
        .expect("add connection");
    client
}

/// Deterministic payload of `len` bytes, including CR/LF bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[derive(Clone, Copy)]
enum Verb {
    Add,
    Set,
    Replace,
}

/// Applies store semantics; returns the new CAS on success.
fn apply_store(
    state: &mut State,
    verb: Verb,
    key: &[u8],
    data: Vec<u8>,
    flags: u32,
    exptime: u32,
    cas: u64,
) -> Result<u64, Status> {
    let existing = state.entries.get(key).map(|entry| entry.cas);
    match (verb, existing) {
        (Verb::Add, Some(_)) => return Err(Status::KeyExists),
        (Verb::Replace, None) => return Err(Status::ItemNotStored),
        _ => {}
    }
    if cas != 0 {
        match existing {
            None => return Err(Status::KeyNotFound),
            Some(current) if current != cas => return Err(Status::KeyExists),
            Some(_) => {}
        }
    }
    let new_cas = state.bump_cas();
    state.entries.insert(
        key.to_vec(),
        Entry {
            data,
            flags,
            exptime,
            cas: new_cas,
        },
    );
    Ok(new_cas)
}

fn serve_text(stream: TcpStream, state: Arc<Mutex<State>>) -> std::io::Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line).trim_end().to_string();
        let parts: Vec<&str> = text.split(' ').collect();
        match parts[0] {
            "get" => {
                if parts[1] == POISON_KEY {
                    writer.write_all(b"BOGUS\r\n")?;
                    continue;
                }
                let entry = state
                    .lock()
                    .expect("state")
                    .entries
                    .get(parts[1].as_bytes())
                    .cloned();
                match entry {
                    Some(entry) => {
                        let mut out = format!(
                            "VALUE {} {} {}\r\n",
                            parts[1],
                            entry.flags,
                            entry.data.len()
                        )
                        .into_bytes();
                        out.extend_from_slice(&entry.data);
                        out.extend_from_slice(b"\r\nEND\r\n");
                        writer.write_all(&out)?;
                    }
                    None => writer.write_all(b"END\r\n")?,
                }
            }
            verb @ ("add" | "set" | "replace") => {
                let flags: u32 = parts[2].parse().expect("flags");
                let exptime: u32 = parts[3].parse().expect("exptime");
                let size: usize = parts[4].parse().expect("size");
                let mut data = vec![0u8; size + 2];
                reader.read_exact(&mut data)?;
                assert_eq!(&data[size..], b"\r\n");
                data.truncate(size);

                if parts[1] == POISON_KEY {
                    writer.write_all(b"SERVER_ERROR poisoned\r\n")?;
                    continue;
                }
                let verb = match verb {
                    "add" => Verb::Add,
                    "set" => Verb::Set,
                    _ => Verb::Replace,
                };
                let mut state = state.lock().expect("state");
                let reply: &[u8] =
                    match apply_store(&mut state, verb, parts[1].as_bytes(), data, flags, exptime, 0) {
                        Ok(_) => b"STORED\r\n",
                        Err(_) => b"NOT_STORED\r\n",
                    };
                writer.write_all(reply)?;
            }
            _ => writer.write_all(b"ERROR\r\n")?,
        }
    }
}

fn serve_binary(mut stream: TcpStream, state: Arc<Mutex<State>>) -> std::io::Result<()> {
    loop {
        let mut header = [0u8; HEADER_SIZE];
        if let Err(err) = stream.read_exact(&mut header) {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(());
            }
            return Err(err);
        }
        assert_eq!(header[0], REQUEST_MAGIC);
        let opcode = Opcode::from_u8(header[1]).expect("opcode");
        let key_len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let extras_len = header[4] as usize;
        let body_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let cas = u64::from_be_bytes(header[16..24].try_into().expect("cas"));

        let mut body = vec![0u8; body_len];
        stream.read_exact(&mut body)?;
        let extras = &body[..extras_len];
        let key = body[extras_len..extras_len + key_len].to_vec();
        let value = body[extras_len + key_len..].to_vec();

        if key == POISON_KEY.as_bytes() {
            stream.write_all(&[0u8; HEADER_SIZE])?;
            continue;
        }

        let mut response = ResponseHeader {
            opcode: opcode.as_u8(),
            key_len: 0,
            extras_len: 0,
            data_type: 0,
            status: 0,
            body_len: 0,
            opaque: 0,
            cas: 0,
        };

        match opcode {
            Opcode::Get => {
                let entry = state.lock().expect("state").entries.get(&key).cloned();
                match entry {
                    Some(entry) => {
                        response.extras_len = 4;
                        response.body_len = 4 + entry.data.len() as u32;
                        response.cas = entry.cas;
                        let mut out = response.encode().to_vec();
                        out.extend_from_slice(&entry.flags.to_be_bytes());
                        out.extend_from_slice(&entry.data);
                        stream.write_all(&out)?;
                    }
                    None => write_error(&mut stream, response, Status::KeyNotFound, "Not found")?,
                }
            }
            Opcode::Add | Opcode::Set | Opcode::Replace => {
                assert_eq!(extras_len, 8);
                let flags = u32::from_be_bytes(extras[..4].try_into().expect("flags"));
                let exptime = u32::from_be_bytes(extras[4..8].try_into().expect("exptime"));
                let verb = match opcode {
                    Opcode::Add => Verb::Add,
                    Opcode::Set => Verb::Set,
                    _ => Verb::Replace,
                };
                let result = {
                    let mut state = state.lock().expect("state");
                    state.last_request_cas = Some(cas);
                    apply_store(&mut state, verb, &key, value, flags, exptime, cas)
                };
                match result {
                    Ok(new_cas) => {
                        response.cas = new_cas;
                        stream.write_all(&response.encode())?;
                    }
                    Err(Status::KeyExists) => {
                        write_error(&mut stream, response, Status::KeyExists, "Data exists for key.")?
                    }
                    Err(Status::KeyNotFound) => {
                        write_error(&mut stream, response, Status::KeyNotFound, "Not found")?
                    }
                    Err(status) => write_error(&mut stream, response, status, "Not stored.")?,
                }
            }
        }
    }
}

fn write_error(
    stream: &mut TcpStream,
    mut response: ResponseHeader,
    status: Status,
    message: &str,
) -> std::io::Result<()> {
    response.status = status as u16;
    response.body_len = message.len() as u32;
    let mut out = response.encode().to_vec();
    out.extend_from_slice(message.as_bytes());
    stream.write_all(&out)
}
