// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

//! end-to-end tests against in-process fake PLCs
//!
//! each test starts a loopback TCP server that speaks just enough of the
//! wire protocol to serve one scenario, then drives the public tag API
//! against it.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use plctag_core::{Event, RawTag, Status};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const EIP_HEADER: usize = 24;

/// what the fake Logix records while serving
#[derive(Default)]
struct EipRecords {
    register_count: usize,
    forward_open_sizes: Vec<u32>,
    read_count: usize,
    write_count: usize,
    multi_count: usize,
    pccc_count: usize,
}

/// behavior knobs for the fake Logix server
struct EipBehavior {
    /// refuse the first ForwardOpen with 0x0109 and this supported size
    refuse_first_fo: Option<u16>,
    /// delay before answering any data request
    read_delay: Duration,
    /// swallow read requests without answering
    black_hole_reads: bool,
    /// value served for every Read Tag / PCCC read; tag names are not
    /// inspected
    dint_value: i32,
}

impl Default for EipBehavior {
    fn default() -> Self {
        EipBehavior {
            refuse_first_fo: None,
            read_delay: Duration::from_millis(0),
            black_hole_reads: false,
            dint_value: 42,
        }
    }
}

fn read_exact(stream: &mut TcpStream, buf: &mut [u8]) -> std::io::Result<()> {
    stream.read_exact(buf)
}

/// read one EIP frame
fn recv_eip(stream: &mut TcpStream) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
    let mut header = vec![0u8; EIP_HEADER];
    read_exact(stream, &mut header)?;
    let length = LittleEndian::read_u16(&header[2..4]) as usize;
    let mut body = vec![0u8; length];
    if length > 0 {
        read_exact(stream, &mut body)?;
    }
    Ok((header, body))
}

fn send_eip(
    stream: &mut TcpStream,
    command: u16,
    session: u32,
    context: u64,
    body: &[u8],
) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(EIP_HEADER + body.len());
    out.extend_from_slice(&command.to_le_bytes());
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend_from_slice(&session.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&context.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(body);
    stream.write_all(&out)
}

/// wrap a CIP reply in a SendRRData CPF
fn rr_body(cip: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&2u16.to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes()); // null address
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&0xB2u16.to_le_bytes());
    body.extend_from_slice(&(cip.len() as u16).to_le_bytes());
    body.extend_from_slice(cip);
    body
}

/// wrap a CIP reply in a SendUnitData CPF
fn unit_body(conn_id: u32, seq: u16, cip: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&2u16.to_le_bytes());
    body.extend_from_slice(&0xA1u16.to_le_bytes());
    body.extend_from_slice(&4u16.to_le_bytes());
    body.extend_from_slice(&conn_id.to_le_bytes());
    body.extend_from_slice(&0xB1u16.to_le_bytes());
    body.extend_from_slice(&(cip.len() as u16 + 2).to_le_bytes());
    body.extend_from_slice(&seq.to_le_bytes());
    body.extend_from_slice(cip);
    body
}

/// a Read Tag reply carrying one DINT
fn dint_reply(value: i32) -> Vec<u8> {
    let mut cip = vec![0x4C | 0x80, 0x00, 0x00, 0x00, 0xC4, 0x00];
    cip.extend_from_slice(&value.to_le_bytes());
    cip
}

/// answer a single CIP request (read, multi or pccc)
fn answer_cip(request: &[u8], records: &Mutex<EipRecords>, value: i32) -> Option<Vec<u8>> {
    match request.first().copied()? {
        0x4C | 0x55 => {
            records.lock().unwrap().read_count += 1;
            Some(dint_reply(value))
        }
        0x4D | 0x53 | 0xCE => {
            records.lock().unwrap().write_count += 1;
            Some(vec![request[0] | 0x80, 0x00, 0x00, 0x00])
        }
        0x0A => {
            // multiple service packet: demux by our own offsets
            let mut rec = records.lock().unwrap();
            rec.multi_count += 1;
            drop(rec);
            let payload = &request[6..];
            let count = LittleEndian::read_u16(&payload[0..2]) as usize;
            let mut subs = Vec::new();
            for i in 0..count {
                let start = LittleEndian::read_u16(&payload[2 + i * 2..4 + i * 2]) as usize;
                let end = if i + 1 < count {
                    LittleEndian::read_u16(&payload[4 + i * 2..6 + i * 2]) as usize
                } else {
                    payload.len()
                };
                subs.push(&payload[start..end]);
            }
            let mut replies = Vec::new();
            for (i, sub) in subs.iter().enumerate() {
                // distinct values so demux order is observable
                let _ = sub;
                records.lock().unwrap().read_count += 1;
                replies.push(dint_reply(value + i as i32));
            }
            let mut out = vec![0x0A | 0x80, 0x00, 0x00, 0x00];
            out.extend_from_slice(&(replies.len() as u16).to_le_bytes());
            let mut offset = 2 + 2 * replies.len();
            for reply in &replies {
                out.extend_from_slice(&(offset as u16).to_le_bytes());
                offset += reply.len();
            }
            for reply in &replies {
                out.extend_from_slice(reply);
            }
            Some(out)
        }
        0x4B => {
            records.lock().unwrap().pccc_count += 1;
            // execute pccc reply: status header, request id echo, pccc frame
            let id_len = request[6] as usize;
            let pccc = &request[6 + id_len..];
            let tnsw = LittleEndian::read_u16(&pccc[2..4]);
            let mut out = vec![0x4B | 0x80, 0x00, 0x00, 0x00];
            out.push(0x07);
            out.extend_from_slice(&request[7..13]);
            out.push(pccc[0] | 0x40);
            out.push(0x00);
            out.extend_from_slice(&tnsw.to_le_bytes());
            out.extend_from_slice(&(value as i16).to_le_bytes());
            Some(out)
        }
        _ => None,
    }
}

/// spawn a fake Logix PLC; serves one connection at a time, forever
fn spawn_eip_server(behavior: EipBehavior) -> (u16, Arc<Mutex<EipRecords>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let records = Arc::new(Mutex::new(EipRecords::default()));
    let records2 = Arc::clone(&records);
    thread::spawn(move || {
        let session_handle = 0x0100_0042u32;
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut fo_seen = 0usize;
            let mut client_conn_id = 0u32;
            loop {
                let Ok((header, body)) = recv_eip(&mut stream) else {
                    break;
                };
                let command = LittleEndian::read_u16(&header[0..2]);
                let context = LittleEndian::read_u64(&header[12..20]);
                match command {
                    0x0065 => {
                        records2.lock().unwrap().register_count += 1;
                        let reply = [1u8, 0, 0, 0];
                        send_eip(&mut stream, 0x0065, session_handle, context, &reply).unwrap();
                    }
                    0x0066 => break,
                    0x006F => {
                        // item count at 6, items follow at 8
                        let cip = {
                            let item_len =
                                LittleEndian::read_u16(&body[14..16]) as usize;
                            &body[16..16 + item_len]
                        };
                        match cip[0] {
                            0x5B | 0x54 => {
                                fo_seen += 1;
                                client_conn_id = LittleEndian::read_u32(&cip[12..16]);
                                let size = if cip[0] == 0x5B {
                                    LittleEndian::read_u32(&cip[32..36]) & 0xFFFF
                                } else {
                                    (LittleEndian::read_u16(&cip[32..34]) & 0x01FF) as u32
                                };
                                records2.lock().unwrap().forward_open_sizes.push(size);
                                let refuse = behavior.refuse_first_fo.filter(|_| fo_seen == 1);
                                let reply = match refuse {
                                    Some(supported) => {
                                        let mut reply =
                                            vec![cip[0] | 0x80, 0x00, 0x01, 0x02];
                                        reply.extend_from_slice(&0x0109u16.to_le_bytes());
                                        reply.extend_from_slice(&supported.to_le_bytes());
                                        reply
                                    }
                                    None => {
                                        let mut reply =
                                            vec![cip[0] | 0x80, 0x00, 0x00, 0x00];
                                        reply.extend_from_slice(&0xCAFE_0001u32.to_le_bytes());
                                        reply.extend_from_slice(&client_conn_id.to_le_bytes());
                                        reply.extend_from_slice(&[0u8; 8]);
                                        reply.extend_from_slice(&[0u8; 8]); // APIs
                                        reply.push(0);
                                        reply.push(0);
                                        reply
                                    }
                                };
                                send_eip(
                                    &mut stream,
                                    0x006F,
                                    session_handle,
                                    context,
                                    &rr_body(&reply),
                                )
                                .unwrap();
                            }
                            0x4E => {
                                let reply = vec![0x4E | 0x80, 0x00, 0x00, 0x00];
                                send_eip(
                                    &mut stream,
                                    0x006F,
                                    session_handle,
                                    context,
                                    &rr_body(&reply),
                                )
                                .unwrap();
                            }
                            _ => {
                                if behavior.black_hole_reads {
                                    continue;
                                }
                                thread::sleep(behavior.read_delay);
                                if let Some(reply) =
                                    answer_cip(cip, &records2, behavior.dint_value)
                                {
                                    send_eip(
                                        &mut stream,
                                        0x006F,
                                        session_handle,
                                        context,
                                        &rr_body(&reply),
                                    )
                                    .unwrap();
                                }
                            }
                        }
                    }
                    0x0070 => {
                        let seq = {
                            let item_len =
                                LittleEndian::read_u16(&body[18..20]) as usize;
                            let _ = item_len;
                            LittleEndian::read_u16(&body[20..22])
                        };
                        let cip = {
                            let item_len =
                                LittleEndian::read_u16(&body[18..20]) as usize;
                            &body[22..20 + item_len + 2]
                        };
                        if behavior.black_hole_reads {
                            continue;
                        }
                        thread::sleep(behavior.read_delay);
                        if let Some(reply) = answer_cip(cip, &records2, behavior.dint_value) {
                            send_eip(
                                &mut stream,
                                0x0070,
                                session_handle,
                                context,
                                &unit_body(client_conn_id, seq, &reply),
                            )
                            .unwrap();
                        }
                    }
                    _ => break,
                }
            }
        }
    });
    (port, records)
}

#[test]
fn test_logix_connected_read_singleton() {
    let (port, records) = spawn_eip_server(EipBehavior::default());
    let path = format!(
        "protocol=ab_eip&plc=lgx&gateway=127.0.0.1:{}&path=1,0&name=MyInt&elem_count=1",
        port
    );
    let tag = RawTag::new(&path, 2000).unwrap();
    assert!(tag.status().is_ok());
    // size and type discovered from the reply
    assert_eq!(tag.size().unwrap(), 4);
    assert_eq!(tag.elem_size().unwrap(), 4);
    assert_eq!(tag.get_i32(0).unwrap(), 42);

    let status = tag.read(2000);
    assert!(status.is_ok(), "read failed: {}", status);
    assert_eq!(tag.get_i32(0).unwrap(), 42);

    let rec = records.lock().unwrap();
    assert_eq!(rec.register_count, 1);
    assert_eq!(rec.forward_open_sizes.len(), 1);
    assert!(rec.read_count >= 2);
    drop(rec);
    drop(tag);
}

#[test]
fn test_forward_open_size_negotiation() {
    let (port, records) = spawn_eip_server(EipBehavior {
        refuse_first_fo: Some(504),
        ..Default::default()
    });
    let path = format!(
        "protocol=ab_eip&plc=lgx&gateway=127.0.0.1:{}&path=1,0&name=MyInt&elem_count=1",
        port
    );
    let tag = RawTag::new(&path, 2000).unwrap();
    assert!(tag.read(2000).is_ok());
    let rec = records.lock().unwrap();
    // first guess refused, second uses the PLC-suggested size
    assert_eq!(rec.forward_open_sizes.len(), 2);
    assert_eq!(rec.forward_open_sizes[1], 504);
    drop(rec);
    drop(tag);
}

#[test]
fn test_multi_service_packing() {
    let (port, records) = spawn_eip_server(EipBehavior {
        read_delay: Duration::from_millis(100),
        ..Default::default()
    });
    let mk = |name: &str| {
        format!(
            "protocol=ab_eip&plc=lgx&gateway=127.0.0.1:{}&path=1,0&name={}&elem_count=1&allow_packing=1",
            port, name
        )
    };
    let tag0 = RawTag::new(mk("Pacer"), 3000).unwrap();
    let tag1 = RawTag::new(mk("DINT1"), 3000).unwrap();
    let tag2 = RawTag::new(mk("DINT2"), 3000).unwrap();

    // occupy the session with one round trip, then queue two packable reads
    // behind it; the scheduler must coalesce them into one 0x0A request
    assert!(tag0.read(0).is_pending());
    thread::sleep(Duration::from_millis(20));
    assert!(tag1.read(0).is_pending());
    assert!(tag2.read(0).is_pending());

    assert!(tag0.wait(Some(Duration::from_secs(3))).is_ok());
    assert!(tag1.wait(Some(Duration::from_secs(3))).is_ok());
    assert!(tag2.wait(Some(Duration::from_secs(3))).is_ok());

    let rec = records.lock().unwrap();
    assert!(rec.multi_count >= 1, "no multi service packet observed");
    drop(rec);
    // positional demux: the fake server answers value+index per sub-request
    assert_eq!(tag1.get_i32(0).unwrap(), 42);
    assert_eq!(tag2.get_i32(0).unwrap(), 43);
}

#[test]
fn test_read_cache_suppresses_round_trips() {
    let (port, records) = spawn_eip_server(EipBehavior::default());
    let path = format!(
        "protocol=ab_eip&plc=lgx&gateway=127.0.0.1:{}&path=1,0&name=Cached&elem_count=1&read_cache_ms=10000",
        port
    );
    let tag = RawTag::new(&path, 2000).unwrap();
    // the creation read primed the cache
    assert!(tag.read(2000).is_ok());
    assert!(tag.read(2000).is_ok());
    assert!(tag.read(2000).is_ok());
    assert_eq!(records.lock().unwrap().read_count, 1);
    drop(tag);
}

#[test]
fn test_abort_then_destroy_event_order() {
    let (port, _records) = spawn_eip_server(EipBehavior {
        black_hole_reads: true,
        ..Default::default()
    });
    let path = format!(
        "protocol=ab_eip&plc=lgx&gateway=127.0.0.1:{}&path=1,0&name=Stuck&elem_count=1",
        port
    );
    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
    let events2 = Arc::clone(&events);
    let started = Instant::now();
    let tag = RawTag::new_with_callback(&path, 0, move |_id, event, _status| {
        events2.lock().unwrap().push(event);
    })
    .unwrap();
    // give the read a moment to get onto the wire
    thread::sleep(Duration::from_millis(50));
    tag.abort().unwrap();
    drop(tag);
    assert!(started.elapsed() < Duration::from_secs(4));

    let events = events.lock().unwrap();
    let pos = |e: Event| events.iter().position(|v| *v == e);
    let created = pos(Event::Created).expect("Created missing");
    let read_started = pos(Event::ReadStarted).expect("ReadStarted missing");
    let aborted = pos(Event::Aborted).expect("Aborted missing");
    let destroyed = pos(Event::Destroyed).expect("Destroyed missing");
    assert!(created < read_started);
    assert!(read_started < aborted);
    assert!(aborted < destroyed);
    assert_eq!(destroyed, events.len() - 1);
    assert_eq!(
        events.iter().filter(|e| **e == Event::Destroyed).count(),
        1
    );
}

#[test]
fn test_auto_sync_read_polls() {
    let (port, records) = spawn_eip_server(EipBehavior::default());
    let path = format!(
        "protocol=ab_eip&plc=lgx&gateway=127.0.0.1:{}&path=1,0&name=Poll&elem_count=1&auto_sync_read_ms=50",
        port
    );
    let tag = RawTag::new(&path, 2000).unwrap();
    let initial = records.lock().unwrap().read_count;
    thread::sleep(Duration::from_millis(500));
    let polled = records.lock().unwrap().read_count;
    assert!(
        polled >= initial + 3,
        "expected several auto reads, saw {} -> {}",
        initial,
        polled
    );
    drop(tag);
}

#[test]
fn test_auto_sync_write_flushes_dirty_buffer() {
    let (port, records) = spawn_eip_server(EipBehavior::default());
    let path = format!(
        "protocol=ab_eip&plc=lgx&gateway=127.0.0.1:{}&path=1,0&name=Setp&elem_count=1&auto_sync_write_ms=50",
        port
    );
    let tag = RawTag::new(&path, 2000).unwrap();
    assert_eq!(records.lock().unwrap().write_count, 0);
    tag.set_i32(0, 99).unwrap();
    thread::sleep(Duration::from_millis(500));
    assert!(records.lock().unwrap().write_count >= 1);
    drop(tag);
}

#[test]
fn test_plc5_pccc_read() {
    let (port, records) = spawn_eip_server(EipBehavior {
        dint_value: -7,
        ..Default::default()
    });
    let path = format!(
        "protocol=ab_eip&plc=plc5&gateway=127.0.0.1:{}&name=N7:0&elem_count=1",
        port
    );
    let tag = RawTag::new(&path, 2000).unwrap();
    assert!(tag.status().is_ok());
    assert_eq!(tag.size().unwrap(), 2);
    assert_eq!(tag.elem_size().unwrap(), 2);
    assert_eq!(tag.get_i16(0).unwrap(), -7);
    // PCCC rides Execute PCCC, not plain CIP reads
    let rec = records.lock().unwrap();
    assert!(rec.pccc_count >= 1);
    assert_eq!(rec.read_count, 0);
    // no ForwardOpen for unconnected PLC/5 messaging
    assert!(rec.forward_open_sizes.is_empty());
    drop(rec);
    drop(tag);
}

#[test]
fn test_session_shared_between_tags() {
    let (port, records) = spawn_eip_server(EipBehavior::default());
    let mk = |name: &str| {
        format!(
            "protocol=ab_eip&plc=lgx&gateway=127.0.0.1:{}&path=1,0&name={}&elem_count=1",
            port, name
        )
    };
    let tag1 = RawTag::new(mk("One"), 2000).unwrap();
    let tag2 = RawTag::new(mk("Two"), 2000).unwrap();
    assert_ne!(tag1.id(), tag2.id());
    // one socket, one registration, one CIP connection
    let rec = records.lock().unwrap();
    assert_eq!(rec.register_count, 1);
    assert_eq!(rec.forward_open_sizes.len(), 1);
    drop(rec);
    drop(tag1);
    drop(tag2);
}

// ----------------------------------------------------------------------
// Modbus
// ----------------------------------------------------------------------

struct MbRecords {
    requests: Vec<Vec<u8>>,
}

/// fake Modbus server answering reads with ascending register values
fn spawn_modbus_server() -> (u16, Arc<Mutex<MbRecords>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let records = Arc::new(Mutex::new(MbRecords {
        requests: Vec::new(),
    }));
    let records2 = Arc::clone(&records);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            loop {
                let mut header = [0u8; 7];
                if stream.read_exact(&mut header).is_err() {
                    break;
                }
                let length = BigEndian::read_u16(&header[4..6]) as usize;
                let mut pdu = vec![0u8; length - 1];
                if stream.read_exact(&mut pdu).is_err() {
                    break;
                }
                let mut frame = header.to_vec();
                frame.extend_from_slice(&pdu);
                records2.lock().unwrap().requests.push(frame.clone());

                let fc = pdu[0];
                let reply_pdu = match fc {
                    0x03 | 0x04 => {
                        let start = BigEndian::read_u16(&pdu[1..3]);
                        let qty = BigEndian::read_u16(&pdu[3..5]);
                        let mut reply = vec![fc, (qty * 2) as u8];
                        for i in 0..qty {
                            reply.extend_from_slice(&(start + i).to_be_bytes());
                        }
                        reply
                    }
                    0x01 | 0x02 => {
                        let qty = BigEndian::read_u16(&pdu[3..5]) as usize;
                        let bytes = (qty + 7) / 8;
                        let mut reply = vec![fc, bytes as u8];
                        // alternating bit pattern
                        reply.extend(std::iter::repeat(0b0101_0101).take(bytes));
                        reply
                    }
                    0x06 | 0x05 => {
                        let mut reply = vec![fc];
                        reply.extend_from_slice(&pdu[1..5]);
                        reply
                    }
                    0x10 | 0x0F => {
                        let mut reply = vec![fc];
                        reply.extend_from_slice(&pdu[1..5]);
                        reply
                    }
                    _ => vec![fc | 0x80, 0x01],
                };
                let mut out = Vec::new();
                out.extend_from_slice(&header[0..2]); // echo tid
                out.extend_from_slice(&0u16.to_be_bytes());
                out.extend_from_slice(&(reply_pdu.len() as u16 + 1).to_be_bytes());
                out.push(header[6]);
                out.extend_from_slice(&reply_pdu);
                if stream.write_all(&out).is_err() {
                    break;
                }
            }
        }
    });
    (port, records)
}

#[test]
fn test_modbus_holding_register_read() {
    let (port, records) = spawn_modbus_server();
    let path = format!(
        "protocol=modbus_tcp&gateway=127.0.0.1:{}&path=1&name=hr10&elem_count=4",
        port
    );
    let tag = RawTag::new(&path, 2000).unwrap();
    assert!(tag.status().is_ok());
    assert_eq!(tag.size().unwrap(), 8);
    // server returns the register number as the value, big-endian
    for i in 0..4u32 {
        assert_eq!(tag.get_u16(i * 2).unwrap(), 10 + i as u16);
    }
    let rec = records.lock().unwrap();
    let frame = &rec.requests[0];
    // MBAP: pid=0, len=6, uid=1, fc=03, start=0x000A, qty=0x0004
    assert_eq!(BigEndian::read_u16(&frame[2..4]), 0);
    assert_eq!(BigEndian::read_u16(&frame[4..6]), 6);
    assert_eq!(frame[6], 1);
    assert_eq!(frame[7], 0x03);
    assert_eq!(BigEndian::read_u16(&frame[8..10]), 0x000A);
    assert_eq!(BigEndian::read_u16(&frame[10..12]), 0x0004);
    drop(rec);
    drop(tag);
}

#[test]
fn test_modbus_coil_read_bit_buffer() {
    let (port, _records) = spawn_modbus_server();
    let path = format!(
        "protocol=modbus_tcp&gateway=127.0.0.1:{}&path=1&name=co20&elem_count=10",
        port
    );
    let tag = RawTag::new(&path, 2000).unwrap();
    // ceil(10/8) data bytes
    assert_eq!(tag.size().unwrap(), 2);
    // server serves 0b0101_0101: even coils on
    assert!(tag.get_bit(0).unwrap());
    assert!(!tag.get_bit(1).unwrap());
    assert!(tag.get_bit(2).unwrap());
    drop(tag);
}

#[test]
fn test_modbus_write_holding_registers() {
    let (port, records) = spawn_modbus_server();
    let path = format!(
        "protocol=modbus_tcp&gateway=127.0.0.1:{}&path=1&name=hr5&elem_count=2",
        port
    );
    let tag = RawTag::new(&path, 2000).unwrap();
    tag.set_u16(0, 0xAABB).unwrap();
    tag.set_u16(2, 0xCCDD).unwrap();
    let status = tag.write(2000);
    assert!(status.is_ok(), "write failed: {}", status);
    let rec = records.lock().unwrap();
    let frame = rec.requests.last().unwrap();
    // fc 0x10, start 5, qty 2, byte count 4, payload
    assert_eq!(frame[7], 0x10);
    assert_eq!(BigEndian::read_u16(&frame[8..10]), 5);
    assert_eq!(BigEndian::read_u16(&frame[10..12]), 2);
    assert_eq!(frame[12], 4);
    assert_eq!(&frame[13..17], &[0xAA, 0xBB, 0xCC, 0xDD]);
    drop(rec);
    drop(tag);
}

#[test]
fn test_modbus_write_to_input_register_rejected() {
    let (port, _records) = spawn_modbus_server();
    let path = format!(
        "protocol=modbus_tcp&gateway=127.0.0.1:{}&path=1&name=ir3&elem_count=1",
        port
    );
    let tag = RawTag::new(&path, 2000).unwrap();
    let status = tag.write(500);
    assert_eq!(Status::new(-18), status); // ERR_NOT_ALLOWED
    drop(tag);
}
