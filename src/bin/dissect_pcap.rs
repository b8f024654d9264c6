use pcap_parser::pcapng::Block as PcapNgBlock;
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{Linktype, PcapBlockOwned, PcapError};
use protodissect::diag::Severity;
use protodissect::dump::tree_to_text;
use protodissect::frame::decode_batch;
use protodissect::grammar::{GrammarFn, Limits};
use protodissect::{cbor, report};
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

/// Which message grammar to run over each UDP payload.
struct GrammarChoice {
    name: &'static str,
    func: GrammarFn,
}

fn grammar_by_name(name: &str) -> Option<GrammarChoice> {
    match name {
        "cbor" => Some(GrammarChoice {
            name: "cbor",
            func: cbor::decode_message,
        }),
        "report" => Some(GrammarChoice {
            name: "report",
            func: report::decode_message,
        }),
        _ => None,
    }
}

#[derive(Default)]
struct Stats {
    packets: u64,
    udp_payloads: u64,
    messages: u64,
    clean_messages: u64,
    warned_messages: u64,
    malformed_messages: u64,
    skipped_regions: u64,
}

struct Options {
    grammar: GrammarChoice,
    limits: Limits,
    transport_skip: Option<usize>,
    verbose: bool,
    frame_filter: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let mut raw_args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = if let Some(pos) = raw_args.iter().position(|a| a == "--verbose" || a == "-v") {
        raw_args.remove(pos);
        true
    } else {
        false
    };
    let dump_path: Option<PathBuf> = raw_args
        .iter()
        .position(|a| a.starts_with("--dump"))
        .and_then(|pos| {
            let arg = raw_args.remove(pos);
            if arg == "--dump" {
                Some(PathBuf::from("-"))
            } else {
                arg.strip_prefix("--dump=").map(PathBuf::from)
            }
        });
    let frame_filter: Option<u64> = raw_args
        .iter()
        .position(|a| a.starts_with("--frame="))
        .and_then(|pos| {
            let arg = raw_args.remove(pos);
            arg.strip_prefix("--frame=").and_then(|s| s.parse().ok())
        });
    let grammar_name: String = raw_args
        .iter()
        .position(|a| a.starts_with("--grammar="))
        .map(|pos| {
            let arg = raw_args.remove(pos);
            arg.strip_prefix("--grammar=").unwrap_or("").to_string()
        })
        .unwrap_or_else(|| "cbor".to_string());
    let transport_skip: Option<usize> = raw_args
        .iter()
        .position(|a| a.starts_with("--skip="))
        .and_then(|pos| {
            let arg = raw_args.remove(pos);
            arg.strip_prefix("--skip=").and_then(|s| s.parse().ok())
        });
    let pcap_path: PathBuf = match raw_args.into_iter().next() {
        Some(p) => PathBuf::from(p),
        None => anyhow::bail!(
            "usage: dissect_pcap [--grammar=cbor|report] [--skip=N] [--verbose] [--dump[=path]] [--frame=N] <capture.pcap>"
        ),
    };
    let grammar = grammar_by_name(&grammar_name)
        .ok_or_else(|| anyhow::anyhow!("unknown grammar `{}` (expected cbor or report)", grammar_name))?;

    let opts = Options {
        grammar,
        limits: Limits::default(),
        transport_skip,
        verbose,
        frame_filter,
    };
    let mut stats = Stats::default();
    let mut dump_writer: Option<Box<dyn Write>> = match dump_path.as_ref() {
        Some(p) if p.as_os_str() == "-" => Some(Box::new(std::io::stdout())),
        Some(p) => Some(Box::new(File::create(p)?)),
        None => None,
    };

    // Probe the magic at the start of the file to tell pcap from pcapng.
    let mut probe = [0u8; 4];
    {
        let mut f = File::open(&pcap_path)?;
        f.read_exact(&mut probe)?;
    }
    let file = File::open(&pcap_path)?;
    if probe == [0x0a, 0x0d, 0x0d, 0x0a] {
        run_pcapng(file, &opts, &mut stats, &mut dump_writer)?;
    } else {
        run_legacy_pcap(file, &opts, &mut stats, &mut dump_writer)?;
    }

    eprintln!("pcap: {}", pcap_path.display());
    eprintln!("grammar: {}", opts.grammar.name);
    eprintln!("packets: {}", stats.packets);
    eprintln!("udp payloads: {}", stats.udp_payloads);
    eprintln!("messages decoded: {}", stats.messages);
    eprintln!("  clean: {}", stats.clean_messages);
    eprintln!("  with warnings: {}", stats.warned_messages);
    eprintln!("  with malformed content: {}", stats.malformed_messages);
    eprintln!("skipped regions: {}", stats.skipped_regions);

    #[cfg(feature = "decode_profile")]
    {
        eprintln!("decode profile:");
        for (label, calls, total) in cbor::profile::take() {
            eprintln!("  {}: {} call(s), {:?}", label, calls, total);
        }
    }

    Ok(())
}

fn run_legacy_pcap<R: Read>(
    file: R,
    opts: &Options,
    stats: &mut Stats,
    dump: &mut Option<Box<dyn Write>>,
) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcap::LegacyPcapReader::new(1 << 20, file)?;
    let mut linktype: Option<Linktype> = None;
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::LegacyHeader(h) => linktype = Some(h.network),
                    PcapBlockOwned::Legacy(b) => {
                        stats.packets += 1;
                        let lt = linktype.unwrap_or(Linktype(1));
                        if let Some(payload) = udp_payload_from_linktype(lt, b.data) {
                            stats.udp_payloads += 1;
                            process_udp_payload(opts, payload, stats.packets, stats, dump);
                        }
                    }
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| anyhow::anyhow!("pcap refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcap read error: {:?}", e)),
        }
    }
    Ok(())
}

fn run_pcapng<R: Read>(
    file: R,
    opts: &Options,
    stats: &mut Stats,
    dump: &mut Option<Box<dyn Write>>,
) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcapng::PcapNGReader::new(1 << 20, file)?;
    let mut if_linktypes: Vec<Linktype> = Vec::new();
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                if let PcapBlockOwned::NG(b) = block {
                    match &b {
                        PcapNgBlock::InterfaceDescription(idb) => if_linktypes.push(idb.linktype),
                        PcapNgBlock::EnhancedPacket(epb) => {
                            stats.packets += 1;
                            let lt = if_linktypes
                                .get(epb.if_id as usize)
                                .copied()
                                .unwrap_or(Linktype(1));
                            if let Some(payload) = udp_payload_from_linktype(lt, epb.packet_data()) {
                                stats.udp_payloads += 1;
                                process_udp_payload(opts, payload, stats.packets, stats, dump);
                            }
                        }
                        PcapNgBlock::SimplePacket(spb) => {
                            stats.packets += 1;
                            let lt = if_linktypes.first().copied().unwrap_or(Linktype(1));
                            if let Some(payload) = udp_payload_from_linktype(lt, spb.packet_data()) {
                                stats.udp_payloads += 1;
                                process_udp_payload(opts, payload, stats.packets, stats, dump);
                            }
                        }
                        _ => {}
                    }
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| anyhow::anyhow!("pcapng refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcapng read error: {:?}", e)),
        }
    }
    Ok(())
}

fn process_udp_payload(
    opts: &Options,
    payload: &[u8],
    packet_index: u64,
    stats: &mut Stats,
    dump: &mut Option<Box<dyn Write>>,
) {
    let res = match decode_batch(payload, opts.grammar.func, opts.limits, opts.transport_skip) {
        Ok(res) => res,
        Err(e) => {
            stats.skipped_regions += 1;
            if opts.verbose {
                eprintln!("packet {}: {}", packet_index, e);
            }
            return;
        }
    };

    stats.messages += res.messages.len() as u64;
    stats.skipped_regions += res.skipped.len() as u64;
    for msg in &res.messages {
        match msg.tree.diagnostics.worst() {
            None => stats.clean_messages += 1,
            Some(Severity::Warn) => stats.warned_messages += 1,
            Some(_) => stats.malformed_messages += 1,
        }
    }

    if opts.frame_filter.map(|f| f != packet_index).unwrap_or(false) {
        return;
    }
    if let Some(w) = dump.as_mut() {
        let _ = writeln!(
            w,
            "=== packet {}  udp payload {} byte(s)  grammar {} ===",
            packet_index,
            payload.len(),
            opts.grammar.name
        );
        let _ = write_payload_hex(&mut **w, payload);
        for msg in &res.messages {
            let (a, b) = msg.byte_range;
            let _ = writeln!(w, "  message bytes [{}-{}]", a, b);
            for line in tree_to_text(&msg.tree).lines() {
                let _ = writeln!(w, "    {}", line);
            }
        }
        for sk in &res.skipped {
            let (a, b) = sk.byte_range;
            let _ = writeln!(w, "  skipped bytes [{}-{}]: {}", a, b, sk.reason);
        }
    } else if opts.verbose && res.messages.is_empty() && !payload.is_empty() {
        let show = payload.len().min(16);
        eprintln!(
            "note: packet {} payload decoded no messages (first {} bytes: {:02x?})",
            packet_index,
            show,
            &payload[..show]
        );
    }
}

/// Hex dump of a payload, 16 bytes per line, offsets from payload start.
fn write_payload_hex(w: &mut dyn Write, payload: &[u8]) -> std::io::Result<()> {
    const COLS: usize = 16;
    for (i, chunk) in payload.chunks(COLS).enumerate() {
        let hex_line = chunk
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(w, "  offset {:3}: {}", i * COLS, hex_line)?;
    }
    Ok(())
}

/// Extract UDP payload bytes from a captured frame, using linktype and
/// IPv4/UDP length fields so Ethernet padding in short frames is dropped.
fn udp_payload_from_linktype(linktype: Linktype, frame: &[u8]) -> Option<&[u8]> {
    let l3 = match linktype.0 {
        1 => ethernet_l3(frame)?,    // DLT_EN10MB
        101 => frame,                // DLT_RAW
        113 => linux_sll_l3(frame)?, // DLT_LINUX_SLL
        _ => return None,
    };
    ipv4_udp_payload(l3)
}

fn ethernet_l3(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < 14 {
        return None;
    }
    let mut off = 12usize;
    let mut ethertype = u16::from_be_bytes([frame[off], frame[off + 1]]);
    off += 2;
    // VLAN tags (802.1Q / 802.1ad): skip the tag and read the next ethertype.
    while ethertype == 0x8100 || ethertype == 0x88a8 {
        if frame.len() < off + 4 + 2 {
            return None;
        }
        off += 4;
        ethertype = u16::from_be_bytes([frame[off], frame[off + 1]]);
        off += 2;
    }
    match ethertype {
        0x0800 => Some(&frame[off..]), // IPv4
        _ => None,
    }
}

fn linux_sll_l3(frame: &[u8]) -> Option<&[u8]> {
    // Linux cooked capture v1: 16-byte header, protocol at bytes 14..16.
    if frame.len() < 16 {
        return None;
    }
    let proto = u16::from_be_bytes([frame[14], frame[15]]);
    match proto {
        0x0800 => Some(&frame[16..]),
        _ => None,
    }
}

fn ipv4_udp_payload(l3: &[u8]) -> Option<&[u8]> {
    if l3.len() < 20 {
        return None;
    }
    let ver_ihl = l3[0];
    if ver_ihl >> 4 != 4 {
        return None;
    }
    let ihl = (ver_ihl & 0x0f) as usize * 4;
    if ihl < 20 || l3.len() < ihl {
        return None;
    }
    let total_len = u16::from_be_bytes([l3[2], l3[3]]) as usize;
    if total_len < ihl {
        return None;
    }
    let l3_trunc = if total_len <= l3.len() { &l3[..total_len] } else { l3 };
    if l3_trunc.len() < ihl + 8 || l3_trunc[9] != 17 {
        return None;
    }
    let udp = &l3_trunc[ihl..];
    let udp_len = u16::from_be_bytes([udp[4], udp[5]]) as usize;
    if udp_len < 8 || udp.len() < udp_len {
        return None;
    }
    Some(&udp[8..udp_len])
}
