#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use qfs_core::{
    BlockNumber, BlockWalkFlags, DirEntry, FileMeta, FsType, InodeNumber, InodeWalkFlags,
    NameType, OpenOptions, QnxFs, RunList, WalkAction,
};
use qfs_error::QfsError;
use serde::Serialize;
use std::collections::BTreeSet;
use std::env;
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;

/// Name shown for the synthetic orphan directory in listings.
const ORPHAN_DIR_NAME: &str = "$OrphanFiles";

// ── Argument parsing ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Args {
    positional: Vec<String>,
    offset: u64,
    fs_type: FsType,
    json: bool,
    recursive: bool,
    alloc: bool,
    unalloc: bool,
}

fn parse_number(raw: &str) -> Result<u64> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.with_context(|| format!("not a number: {raw}"))
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut args = Args::default();
    let mut iter = raw.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--json" => args.json = true,
            "-r" | "--recursive" => args.recursive = true,
            "--alloc" | "-a" => args.alloc = true,
            "--unalloc" | "-A" => args.unalloc = true,
            "--offset" | "-o" => {
                let Some(value) = iter.next() else {
                    bail!("--offset requires a byte offset");
                };
                args.offset = parse_number(&value)?;
            }
            "--type" | "-f" => {
                let Some(value) = iter.next() else {
                    bail!("--type requires a filesystem type");
                };
                args.fs_type = value.parse()?;
            }
            flag if flag.starts_with('-') && flag.len() > 1 => bail!("unknown option: {flag}"),
            _ => args.positional.push(arg),
        }
    }
    Ok(args)
}

impl Args {
    fn image(&self) -> Result<&Path> {
        self.positional
            .first()
            .map(Path::new)
            .context("missing <image-path>")
    }

    fn inode(&self, index: usize) -> Result<Option<InodeNumber>> {
        self.positional
            .get(index)
            .map(|raw| parse_number(raw).map(InodeNumber))
            .transpose()
    }

    fn open(&self) -> Result<QnxFs> {
        let path = self.image()?;
        let options = OpenOptions {
            volume_offset: self.offset,
            fs_type: self.fs_type,
        };
        QnxFs::open_with_options(path, &options)
            .with_context(|| format!("failed to open QNX6 volume in {}", path.display()))
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        let code = match error.downcast_ref::<QfsError>() {
            Some(err) if err.is_image_fault() => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    let mut argv = env::args().skip(1);
    let Some(command) = argv.next() else {
        print_usage();
        return Ok(());
    };
    if matches!(command.as_str(), "--help" | "-h" | "help") {
        print_usage();
        return Ok(());
    }

    let args = parse_args(argv)?;
    debug!(command = command.as_str(), ?args, "qfs_command");
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command.as_str() {
        "fsstat" => fsstat(&args.open()?, args.json, &mut out),
        "istat" => {
            let Some(ino) = args.inode(1)? else {
                bail!("istat requires <image-path> <inode>");
            };
            istat(&args.open()?, ino, args.json, &mut out)
        }
        "fls" => {
            let dir = args.inode(1)?.unwrap_or(InodeNumber::ROOT);
            fls(&args.open()?, dir, args.recursive, args.json, &mut out)
        }
        "ils" => ils(&args.open()?, walk_inode_flags(&args), args.json, &mut out),
        "blkls" => blkls(&args.open()?, walk_block_flags(&args), args.json, &mut out),
        "icat" => {
            let Some(ino) = args.inode(1)? else {
                bail!("icat requires <image-path> <inode>");
            };
            icat(&args.open()?, ino, &mut out)
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }?;
    out.flush().context("flush stdout")
}

fn print_usage() {
    println!("qfs\n");
    println!("USAGE:");
    println!("  qfs fsstat <image-path> [--json]");
    println!("  qfs istat <image-path> <inode> [--json]");
    println!("  qfs fls <image-path> [dir-inode] [-r] [--json]");
    println!("  qfs ils <image-path> [--alloc | --unalloc] [--json]");
    println!("  qfs blkls <image-path> [--alloc | --unalloc] [--json]");
    println!("  qfs icat <image-path> <inode>");
    println!();
    println!("COMMON OPTIONS:");
    println!("  --offset <bytes>   volume offset inside the image (decimal or 0x hex)");
    println!("  --type <type>      filesystem type: detect | qnx6");
}

fn walk_inode_flags(args: &Args) -> InodeWalkFlags {
    let mut flags = InodeWalkFlags::NONE;
    if args.alloc {
        flags = flags | InodeWalkFlags::ALLOC;
    }
    if args.unalloc {
        flags = flags | InodeWalkFlags::UNALLOC;
    }
    flags
}

fn walk_block_flags(args: &Args) -> BlockWalkFlags {
    let mut flags = BlockWalkFlags::AONLY;
    if args.alloc {
        flags = flags | BlockWalkFlags::ALLOC;
    }
    if args.unalloc {
        flags = flags | BlockWalkFlags::UNALLOC;
    }
    flags
}

fn print_json(out: &mut impl Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).context("serialize output")?;
    writeln!(out)?;
    Ok(())
}

// ── Commands ────────────────────────────────────────────────────────────────

fn fsstat(fs: &QnxFs, json: bool, out: &mut impl Write) -> Result<()> {
    if json {
        return print_json(out, &fs.stat());
    }
    fs.fsstat(out)?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct IstatOutput<'a> {
    meta: &'a FileMeta,
    runs: &'a RunList,
}

fn istat(fs: &QnxFs, ino: InodeNumber, json: bool, out: &mut impl Write) -> Result<()> {
    if json {
        let file = fs.open_file(ino)?;
        let runs = file.run_list()?;
        return print_json(
            out,
            &IstatOutput {
                meta: file.meta(),
                runs,
            },
        );
    }
    fs.istat(ino, out)?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct ListedEntry {
    path: String,
    ino: u64,
    kind: NameType,
}

fn type_tag(kind: NameType) -> String {
    format!("{0}/{0}", kind.short_tag())
}

/// Collect listing rows depth first. The orphan directory appears under the
/// root only.
fn collect_listing(fs: &QnxFs, dir: InodeNumber, recursive: bool) -> Result<Vec<ListedEntry>> {
    let mut rows = Vec::new();
    let mut visited = BTreeSet::from([dir]);
    let mut stack = vec![(dir, String::new())];
    while let Some((ino, prefix)) = stack.pop() {
        let entries: Vec<DirEntry> = if ino == fs.orphan_dir_ino() {
            fs.orphan_directory()?.entries().to_vec()
        } else {
            fs.open_directory(ino)?.into_entries()
        };
        let mut children = Vec::new();
        for entry in entries {
            if entry.name == b"." || entry.name == b".." {
                continue;
            }
            let path = format!("{prefix}{}", entry.name_str());
            if recursive && entry.kind == NameType::Directory && visited.insert(entry.ino) {
                children.push((entry.ino, format!("{path}/")));
            }
            rows.push(ListedEntry {
                path,
                ino: entry.ino.0,
                kind: entry.kind,
            });
        }
        if ino == InodeNumber::ROOT && prefix.is_empty() {
            let orphan = fs.orphan_dir_ino();
            rows.push(ListedEntry {
                path: ORPHAN_DIR_NAME.to_owned(),
                ino: orphan.0,
                kind: NameType::Directory,
            });
            if recursive && visited.insert(orphan) {
                children.push((orphan, format!("{ORPHAN_DIR_NAME}/")));
            }
        }
        // Reverse so the stack pops children in directory order.
        stack.extend(children.into_iter().rev());
    }
    Ok(rows)
}

fn fls(
    fs: &QnxFs,
    dir: InodeNumber,
    recursive: bool,
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let rows = collect_listing(fs, dir, recursive)?;
    if json {
        return print_json(out, &rows);
    }
    for row in &rows {
        let depth = row.path.matches('/').count();
        let indent = "+".repeat(depth);
        let name = row.path.rsplit('/').next().unwrap_or(&row.path);
        if depth > 0 {
            write!(out, "{indent} ")?;
        }
        writeln!(out, "{} {}:\t{name}", type_tag(row.kind), row.ino)?;
    }
    Ok(())
}

fn ils(fs: &QnxFs, flags: InodeWalkFlags, json: bool, out: &mut impl Write) -> Result<()> {
    let mut metas = Vec::new();
    fs.inode_walk(fs.first_inode(), fs.last_inode(), flags, |file| {
        metas.push(file.meta().clone());
        WalkAction::Continue
    })?;
    if json {
        return print_json(out, &metas);
    }
    writeln!(out, "inum|alloc|mode|uid|gid|mtime|atime|ctime|crtime|size")?;
    for m in &metas {
        writeln!(
            out,
            "{}|{}|{:o}|{}|{}|{}|{}|{}|{}|{}",
            m.ino,
            if m.allocated { 'a' } else { 'f' },
            m.mode,
            m.uid,
            m.gid,
            m.mtime,
            m.atime,
            m.ctime,
            m.crtime,
            m.size
        )?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ListedBlock {
    addr: u64,
    flags: Vec<&'static str>,
}

fn blkls(fs: &QnxFs, flags: BlockWalkFlags, json: bool, out: &mut impl Write) -> Result<()> {
    let Some(last) = fs.geometry().last_block() else {
        return Ok(());
    };
    let mut blocks = Vec::new();
    fs.block_walk(BlockNumber(0), last, flags, |block| {
        blocks.push(ListedBlock {
            addr: block.addr.0,
            flags: block.flags.describe(),
        });
        WalkAction::Continue
    })?;
    if json {
        return print_json(out, &blocks);
    }
    for block in &blocks {
        writeln!(out, "{}\t{}", block.addr, block.flags.join("|"))?;
    }
    Ok(())
}

fn icat(fs: &QnxFs, ino: InodeNumber, out: &mut impl Write) -> Result<()> {
    const CHUNK: usize = 1 << 20;
    let file = fs.open_file(ino)?;
    let size = file.meta().size;
    let mut offset = 0_u64;
    while offset < size {
        let data = file.read(offset, CHUNK)?;
        if data.is_empty() {
            break;
        }
        out.write_all(&data)?;
        offset += data.len() as u64;
    }
    Ok(())
}
