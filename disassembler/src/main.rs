use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use rdrasm_core::asm::Platform;
use rdrasm_core::disasm::listing::StringEntry;
use rdrasm_core::disasm::opcode::OP_ENTER;
use rdrasm_core::disasm::{Analysis, Decoder, Instruction, Listing, Resolver};
use rdrasm_core::format::container::ResourceHeader;
use rdrasm_core::format::key::ScriptKey;
use rdrasm_core::format::script::{Script, ScriptHeader};
use rdrasm_core::format::transform::{Compression, Lzx, Stored};
use rdrasm_core::tables::{NativeNames, OpcodeTable};

#[derive(Debug, Serialize)]
pub struct InstEntry {
    address: String,
    bytes: String,
    mnemonic: String,
    operands: String,
}

#[derive(Debug, Serialize)]
pub struct FunctionEntry {
    name: String,
    entry: usize,
    arg_count: u8,
    frame_size: u16,
    references: Vec<usize>,
    insts: Vec<InstEntry>,
}

/// Instructions grouped by the function that owns them, for
/// `disassembly.yaml`. Code before the first function prologue (none in
/// well-formed scripts) goes into a synthetic `_header` group.
fn group_functions(
    insts: &[Instruction],
    analysis: &Analysis,
    table: &OpcodeTable,
) -> Vec<FunctionEntry> {
    let mut groups: Vec<FunctionEntry> = Vec::new();
    for inst in insts {
        if inst.opcode == OP_ENTER || groups.is_empty() {
            let entry = match analysis.functions.get(&inst.offset) {
                Some(f) => FunctionEntry {
                    name: f.name.clone(),
                    entry: f.entry,
                    arg_count: f.arg_count,
                    frame_size: f.frame_size,
                    references: f.references.clone(),
                    insts: Vec::new(),
                },
                None => FunctionEntry {
                    name: "_header".to_owned(),
                    entry: inst.offset,
                    arg_count: 0,
                    frame_size: 0,
                    references: Vec::new(),
                    insts: Vec::new(),
                },
            };
            groups.push(entry);
        }
        let group = groups.last_mut().unwrap();
        group.insts.push(InstEntry {
            address: inst.formatted_location(),
            bytes: inst.formatted_bytes(),
            mnemonic: table.name(inst.opcode).to_owned(),
            operands: inst.operand_hex(),
        });
    }
    groups
}

#[derive(Debug, Serialize)]
pub struct NativeEntry {
    hash: String,
    name: String,
}

#[derive(Debug, Serialize)]
pub struct ScriptReport<'a> {
    platform: Option<&'static str>,
    resource: &'a ResourceHeader,
    header_pos: usize,
    header: &'a ScriptHeader,
    statics: &'a [i32],
    natives: Vec<NativeEntry>,
    strings: &'a [StringEntry],
    invalid_calls: u32,
}

#[derive(Debug, Serialize)]
pub struct Project {
    script_file: PathBuf,
    disassembly_file: PathBuf,
    listing_file: PathBuf,
    code_file: PathBuf,
    platform: String,
}

fn write_project(
    output: &Path,
    script: &Script,
    image: &[u8],
    analysis: &Analysis,
    listing: &Listing,
    functions: &[FunctionEntry],
    names: &NativeNames,
) -> Result<()> {
    if !output.exists() {
        std::fs::create_dir_all(output)?;
    }

    let listing_path = output.join("listing.txt");
    std::fs::write(&listing_path, listing.to_text())?;

    // the contiguous code region, editable and fed back through
    // `assembler --code`
    let code_path = output.join("code.bin");
    std::fs::write(&code_path, image)?;

    let disassembly_path = output.join("disassembly.yaml");
    let mut writer = std::fs::File::create(disassembly_path)?;
    serde_yaml::to_writer(&mut writer, functions)?;

    let platform = Platform::from_magic(script.resource.magic);
    let report = ScriptReport {
        platform: platform.map(Platform::extension),
        resource: &script.resource,
        header_pos: script.header_pos,
        header: &script.header,
        statics: &script.statics,
        natives: script
            .natives
            .iter()
            .map(|&hash| NativeEntry {
                hash: format!("0x{hash:08X}"),
                name: names.display(hash),
            })
            .collect(),
        strings: listing.strings(),
        invalid_calls: analysis.invalid_calls,
    };
    let script_path = output.join("script.yaml");
    let mut writer = std::fs::File::create(script_path)?;
    serde_yaml::to_writer(&mut writer, &report)?;

    let project = Project {
        script_file: PathBuf::from("script.yaml"),
        disassembly_file: PathBuf::from("disassembly.yaml"),
        listing_file: PathBuf::from("listing.txt"),
        code_file: PathBuf::from("code.bin"),
        platform: platform.map(Platform::extension).unwrap_or("unknown").to_owned(),
    };
    let toml_project = output.join("project.toml");
    let mut writer = std::fs::File::create(toml_project)?;
    let serialized_string = toml::to_string_pretty(&project)?;
    writer.write_all(serialized_string.as_bytes())?;

    Ok(())
}

#[derive(ClapParser, Debug)]
#[command(version, about = "Disassemble a RAGE script container (.xsc/.csc)", long_about = None)]
struct Args {
    #[arg(short, long, required = true)]
    input: PathBuf,

    #[arg(short, long, required = true)]
    output: PathBuf,

    /// File holding the 256-bit title key as hex; required for
    /// encrypted (version 2) containers
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Treat the payload as stored instead of LZX-compressed
    #[arg(long)]
    stored: bool,

    /// Opcode table overriding the built-in one
    #[arg(long)]
    opcodes: Option<PathBuf>,

    /// Native-name table overriding the built-in one
    #[arg(long)]
    natives: Option<PathBuf>,
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
    let natives_override;
    let names = match &args.natives {
        Some(path) => {
            natives_override = NativeNames::from_file(path)
                .with_context(|| format!("loading native names {}", path.display()))?;
            &natives_override
        }
        None => NativeNames::builtin(),
    };

    let script = Script::decode(&raw, key.as_ref(), codec.as_ref())
        .context("unwrapping the container")?;
    let image = script.code_image().context("assembling the code image")?;

    let mut decoder = Decoder::new(&image, &script.pages, table);
    decoder.decode_all().context("decoding the code region")?;
    let analysis = Resolver::new(&script.pages, &script.natives, names)
        .resolve(decoder.instructions())
        .context("resolving control flow")?;
    let listing = Listing::build(decoder.instructions(), &analysis, table);
    let functions = group_functions(decoder.instructions(), &analysis, table);

    write_project(&args.output, &script, &image, &analysis, &listing, &functions, names)?;
    log::info!(
        "{}: {} function(s), {} instruction(s) -> {}",
        args.input.display(),
        functions.len(),
        decoder.instructions().len(),
        args.output.display(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdrasm_core::disasm::opcode::{OP_CALL2, OP_LEAVE};
    use rdrasm_core::format::pages::PageMap;

    #[test]
    fn instructions_group_under_their_function() {
        let mut code = Vec::new();
        code.extend_from_slice(&[OP_ENTER, 1, 0, 0, 0]); // @0
        code.extend_from_slice(&[OP_CALL2, 0x00, 11]); // @5 -> sub @11
        code.extend_from_slice(&[OP_LEAVE, 0, 0]); // @8
        code.extend_from_slice(&[OP_ENTER, 0, 0, 0, 0]); // @11
        code.extend_from_slice(&[OP_LEAVE, 0, 0]); // @16

        let pages = PageMap::new(vec![0], code.len());
        let table = OpcodeTable::builtin();
        let mut decoder = Decoder::new(&code, &pages, table);
        decoder.decode_all().unwrap();
        let names = NativeNames::default();
        let analysis = Resolver::new(&pages, &[], &names)
            .resolve(decoder.instructions())
            .unwrap();

        let groups = group_functions(decoder.instructions(), &analysis, table);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "sub_000000");
        assert_eq!(groups[0].insts.len(), 3);
        assert_eq!(groups[1].name, "sub_00000B");
        assert_eq!(groups[1].references, vec![5]);
    }

    #[test]
    fn project_dir_carries_the_editable_code_image() -> Result<()> {
        use rdrasm_core::format::container::SCRIPT_HEADER_MAGIC;
        use rdrasm_core::format::pages::PAGE_SIZE;
        use rdrasm_core::format::transform::Stored;

        // one code page at physical 0, script header in page 1
        let mut buf = vec![0u8; 2 * PAGE_SIZE];
        let mut code = Vec::new();
        code.extend_from_slice(&[OP_ENTER, 0, 0, 0, 0]);
        code.extend_from_slice(&[OP_LEAVE, 0, 0]);
        code.resize(16, 0x00);
        buf[..16].copy_from_slice(&code);

        let h = PAGE_SIZE;
        let put = |buf: &mut [u8], at: usize, v: u32| {
            buf[at..at + 4].copy_from_slice(&v.to_be_bytes());
        };
        put(&mut buf, h, SCRIPT_HEADER_MAGIC);
        put(&mut buf, h + 4, (h + 64) as u32); // pageMapPtr
        put(&mut buf, h + 8, (h + 64) as u32); // codePagesPtr
        put(&mut buf, h + 12, 16); // codeSize
        put(&mut buf, h + 24, (h + 80) as u32); // staticsPtr
        put(&mut buf, h + 36, (h + 80) as u32); // nativesPtr
        put(&mut buf, h + 64, 0); // page 0 base

        let mut raw = Vec::new();
        raw.extend_from_slice(&0x8543_5352u32.to_be_bytes());
        raw.extend_from_slice(&1u32.to_be_bytes());
        raw.extend_from_slice(&0u32.to_be_bytes());
        raw.extend_from_slice(&0u32.to_be_bytes());
        raw.extend_from_slice(&buf);

        let script = Script::decode(&raw, None, &Stored)?;
        let image = script.code_image()?;
        let table = OpcodeTable::builtin();
        let mut decoder = Decoder::new(&image, &script.pages, table);
        decoder.decode_all()?;
        let names = NativeNames::builtin();
        let analysis = Resolver::new(&script.pages, &script.natives, names)
            .resolve(decoder.instructions())?;
        let listing = Listing::build(decoder.instructions(), &analysis, table);
        let functions = group_functions(decoder.instructions(), &analysis, table);

        let output = std::env::temp_dir().join("rdrasm-disassembler-project");
        write_project(&output, &script, &image, &analysis, &listing, &functions, names)?;

        assert_eq!(std::fs::read(output.join("code.bin"))?, image);
        let project = std::fs::read_to_string(output.join("project.toml"))?;
        assert!(project.contains("code_file = \"code.bin\""));
        for file in ["listing.txt", "disassembly.yaml", "script.yaml"] {
            assert!(output.join(file).exists(), "{file} missing");
        }
        Ok(())
    }
}
