use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use rdrasm_core::asm::{Platform, Reassembler};
use rdrasm_core::disasm::Decoder;
use rdrasm_core::format::key::ScriptKey;
use rdrasm_core::format::script::Script;
use rdrasm_core::format::transform::{Compression, Lzx, Stored};
use rdrasm_core::tables::OpcodeTable;

#[derive(Parser, Debug)]
#[command(version, about = "Rebuild a RAGE script container (.xsc/.csc)", long_about = None)]
struct Args {
    #[arg(short, long, required = true)]
    input: PathBuf,

    #[arg(short, long, required = true)]
    output: PathBuf,

    /// Target platform (ps3 or x360); defaults to the input's platform
    #[arg(short, long)]
    platform: Option<Platform>,

    /// Contiguous code image replacing the input's code region; must be
    /// exactly code_size bytes of valid instructions
    #[arg(long)]
    code: Option<PathBuf>,

    /// File holding the 256-bit title key as hex; required for
    /// encrypted (version 2) containers
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Treat payloads as stored instead of LZX-compressed. LZX has no
    /// packer here, so emitting an encrypted container requires this.
    #[arg(long)]
    stored: bool,

    /// Opcode table overriding the built-in one
    #[arg(long)]
    opcodes: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let raw = std::fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let key = match &args.key {
        Some(path) => Some(
            ScriptKey::from_file(path)
                .with_context(|| format!("loading key from {}", path.display()))?,
        ),
        None => None,
    };
    let codec: Box<dyn Compression> = if args.stored {
        Box::new(Stored)
    } else {
        Box::new(Lzx::default())
    };
    let opcodes_override;
    let table = match &args.opcodes {
        Some(path) => {
            opcodes_override = OpcodeTable::from_file(path)
                .with_context(|| format!("loading opcode table {}", path.display()))?;
            &opcodes_override
        }
        None => OpcodeTable::builtin(),
    };

    let script = Script::decode(&raw, key.as_ref(), codec.as_ref())
        .context("unwrapping the container")?;
    let image = match &args.code {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("reading code image {}", path.display()))?,
        None => script.code_image().context("assembling the code image")?,
    };

    // decoding validates the image before anything is written
    let mut decoder = Decoder::new(&image, &script.pages, table);
    decoder.decode_all().context("decoding the code image")?;

    let platform = match args.platform.or_else(|| Platform::from_magic(script.resource.magic)) {
        Some(platform) => platform,
        None => bail!(
            "input magic {:#010x} is not a known platform; pass --platform",
            script.resource.magic
        ),
    };

    let out = Reassembler::new(&script)
        .encode(decoder.instructions(), platform, key.as_ref(), codec.as_ref())
        .context("encoding the container")?;
    std::fs::write(&args.output, &out)
        .with_context(|| format!("writing {}", args.output.display()))?;
    log::info!(
        "{} -> {} ({} bytes, .{})",
        args.input.display(),
        args.output.display(),
        out.len(),
        platform.extension(),
    );
    Ok(())
}
