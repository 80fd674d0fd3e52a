//! SMMU trace runner
//!
//! Replays a CSV trace of configuration and DMA accesses against the
//! model and prints the outcome of each access. Three record kinds are
//! understood, with `#` starting a comment:
//!
//! ```text
//! STREAM, <stream_id>, <asid>        bind a stream to an address space
//! MAP,    <asid>, <va>, <pa> [, RO]  install a 4KB mapping
//! ACCESS, <stream_id>, <va> [, W]    run a translation
//! ```
//!
//! Numbers are decimal or `0x`-prefixed hexadecimal.

use std::cell::RefCell;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::process;
use std::rc::Rc;

use smmu_model::{
    AccessKind, AccessPermission, Asid, ContextDescriptor, PageTableBuilder, Smmu, SmmuConfig,
    StreamId, StreamTableEntry, SysMemory,
};

struct TraceRecord {
    kind: String,
    args: Vec<String>,
    line: usize,
}

fn parse_trace(text: &str) -> Vec<TraceRecord> {
    let mut records = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let mut fields = line.split(',').map(str::trim).filter(|f| !f.is_empty());
        if let Some(kind) = fields.next() {
            records.push(TraceRecord {
                kind: kind.to_string(),
                args: fields.map(str::to_string).collect(),
                line: idx + 1,
            });
        }
    }
    records
}

fn parse_num(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

struct TraceRunner {
    smmu: Smmu,
    memory: Rc<RefCell<SysMemory>>,
    tables: HashMap<Asid, PageTableBuilder>,
    stream_asids: HashMap<StreamId, Asid>,
}

impl TraceRunner {
    fn new() -> Self {
        let memory = Rc::new(RefCell::new(SysMemory::new()));
        let mut smmu = Smmu::new(SmmuConfig::default());
        smmu.set_memory(memory.clone());
        smmu.enable();
        Self {
            smmu,
            memory,
            tables: HashMap::new(),
            stream_asids: HashMap::new(),
        }
    }

    fn table_for(&mut self, asid: Asid) -> &mut PageTableBuilder {
        let memory = self.memory.clone();
        self.tables
            .entry(asid)
            .or_insert_with(|| PageTableBuilder::new(memory))
    }

    fn configure_stream(&mut self, stream_id: StreamId, asid: Asid) {
        self.stream_asids.insert(stream_id, asid);

        self.smmu.configure_stream_table_entry(
            stream_id,
            StreamTableEntry {
                valid: true,
                s1_enabled: true,
                ..Default::default()
            },
        );

        let ttb = self.table_for(asid).root();
        self.smmu.configure_context_descriptor(
            stream_id,
            asid,
            ContextDescriptor {
                valid: true,
                translation_table_base: ttb,
                asid,
                translation_granule: 12,
                ips: 48,
                ..Default::default()
            },
        );
        println!(
            "[CONFIG] stream {} -> asid {} (table {:#x})",
            stream_id, asid, ttb
        );
    }

    fn map(&mut self, asid: Asid, va: u64, pa: u64, ap: AccessPermission) {
        self.table_for(asid).map(va, pa, ap);
        println!("[MAP] asid {}: va {:#x} -> pa {:#x}", asid, va, pa);
    }

    fn access(&mut self, stream_id: StreamId, va: u64, kind: AccessKind) {
        let asid = self.stream_asids.get(&stream_id).copied().unwrap_or(0);
        let result = self.smmu.translate_access(va, stream_id, asid, 0, kind);
        if result.success {
            println!(
                "[ACCESS] stream {} (asid {}) va {:#x} -> pa {:#x}",
                stream_id, asid, va, result.physical_addr
            );
        } else {
            println!(
                "[ACCESS] stream {} (asid {}) va {:#x} -> FAULT ({})",
                stream_id, asid, va, result.fault_reason
            );
        }
    }

    fn print_statistics(&self) {
        let stats = self.smmu.get_statistics();
        println!();
        println!("Final statistics:");
        println!("  translations: {}", stats.total_translations);
        println!("  tlb hits:     {}", stats.tlb_hits);
        println!("  tlb misses:   {}", stats.tlb_misses);
        println!("  walks:        {}", stats.page_table_walks);
        println!("  faults:       {}", stats.translation_faults);
    }
}

fn run(records: &[TraceRecord]) {
    let mut runner = TraceRunner::new();

    for record in records {
        match record.kind.as_str() {
            "STREAM" => {
                let (Some(sid), Some(asid)) = (
                    record.args.first().and_then(|a| parse_num(a)),
                    record.args.get(1).and_then(|a| parse_num(a)),
                ) else {
                    eprintln!("line {}: STREAM needs <stream_id>, <asid>", record.line);
                    continue;
                };
                runner.configure_stream(sid as StreamId, asid as Asid);
            }
            "MAP" => {
                let (Some(asid), Some(va), Some(pa)) = (
                    record.args.first().and_then(|a| parse_num(a)),
                    record.args.get(1).and_then(|a| parse_num(a)),
                    record.args.get(2).and_then(|a| parse_num(a)),
                ) else {
                    eprintln!("line {}: MAP needs <asid>, <va>, <pa>", record.line);
                    continue;
                };
                let ap = if record.args.get(3).map(String::as_str) == Some("RO") {
                    AccessPermission::ReadOnly
                } else {
                    AccessPermission::ReadWrite
                };
                runner.map(asid as Asid, va, pa, ap);
            }
            "ACCESS" => {
                let (Some(sid), Some(va)) = (
                    record.args.first().and_then(|a| parse_num(a)),
                    record.args.get(1).and_then(|a| parse_num(a)),
                ) else {
                    eprintln!("line {}: ACCESS needs <stream_id>, <va>", record.line);
                    continue;
                };
                let kind = if record.args.get(2).map(String::as_str) == Some("W") {
                    AccessKind::Write
                } else {
                    AccessKind::Read
                };
                runner.access(sid as StreamId, va, kind);
            }
            other => {
                eprintln!("line {}: unknown record '{}'", record.line, other);
            }
        }
    }

    runner.print_statistics();
}

fn main() {
    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| String::from("smmu-trace"));
    let Some(path) = args.next() else {
        eprintln!("usage: {} <trace.csv>", program);
        process::exit(1);
    };

    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("error: could not read {}: {}", path, err);
            process::exit(1);
        }
    };

    let records = parse_trace(&text);
    println!("Replaying {} records from {}", records.len(), path);
    run(&records);
}
