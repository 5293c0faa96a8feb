// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// The S5L parts are ARMv5/ARMv6 cores without Thumb-2, so build plain ARM
/// code. There's no prebuilt `core` for this target; building it needs a
/// nightly toolchain.
const TARGET: &str = "armv5te-none-eabi";

/// SoCs with a support package in `src/soc`.
const SOCS: &[&str] = &["s5l8443", "s5l8723"];

#[derive(Debug, Parser)]
enum Xtask {
    /// Builds the hook for one SoC and flattens it into a raw image, ready to
    /// be spliced into the ROM's DFU upload handler.
    Package {
        #[clap(long)]
        soc: String,
        /// Address the image will be loaded and called at.
        #[clap(long, default_value = "0x22028000", value_parser = parse_addr)]
        base: u32,
        #[clap(long)]
        out: PathBuf,
    },
}

fn parse_addr(s: &str) -> Result<u32> {
    let s = s.replace('_', "");
    let value = match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    value.with_context(|| format!("bad address {s:?}"))
}

// borrowed from hubris
fn remap_paths() -> Result<BTreeMap<PathBuf, &'static str>> {
    // Panic messages in crates have a long prefix; we'll shorten it using
    // the --remap-path-prefix argument to keep them out of a very small image.
    // We'll remap local crates to /dfuhook, crates.io to /crates.io, and git
    // dependencies to /git
    let mut remap_paths = BTreeMap::new();

    if let Ok(home) = std::env::var("CARGO_HOME") {
        let cargo_home = PathBuf::from(home);
        let cargo_git = cargo_home.join("git").join("checkouts");
        remap_paths.insert(cargo_git, "/git");

        // This hash is canonical-ish: Cargo tries hard not to change it
        // https://github.com/rust-lang/cargo/blob/5dfdd59/src/cargo/core/source_id.rs#L755-L794
        let cargo_registry = cargo_home
            .join("registry")
            .join("src")
            .join("github.com-1ecc6299db9ec823");
        remap_paths.insert(cargo_registry, "/crates.io");
        // Same again for the sparse registry.
        let cargo_sparse_registry = cargo_home
            .join("registry")
            .join("src")
            .join("index.crates.io-6f17d22bba15001f");
        remap_paths.insert(cargo_sparse_registry, "/crates.io");
    }

    if let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") {
        let mut root = PathBuf::from(dir);
        root.pop();
        remap_paths.insert(root, "/dfuhook");
    }
    Ok(remap_paths)
}

fn build(soc: &str, base: u32) -> Result<PathBuf> {
    let mut rustflags = remap_paths()?.iter().fold(String::new(), |mut output, r| {
        let _ = write!(output, " --remap-path-prefix={}={}", r.0.display(), r.1);
        output
    });
    // The image runs where it's put; nothing relocates it.
    let _ = write!(
        rustflags,
        " -C relocation-model=static -C link-arg=-Thook.ld -C link-arg=--defsym=HOOK_BASE={base:#x}"
    );

    let cargo = std::env::var_os("CARGO").unwrap_or_else(|| "cargo".into());
    let mut command = Command::new(cargo);
    command.arg("build");
    command.arg("--release");
    command.arg("-Zbuild-std=core");
    command.args(["--target", TARGET]);
    command.args(["--bin", "hook"]);
    command.arg("--no-default-features");
    command.arg("--features");
    command.arg(format!("image,target-soc-{}", soc));
    command.env("RUSTFLAGS", rustflags);

    let status = command
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .context("running cargo")?;

    if !status.success() {
        bail!("build failed: {}", status);
    }

    Ok(Path::new("target").join(TARGET).join("release").join("hook"))
}

/// Strips the ELF down to the bytes that get loaded, starting at the entry
/// point.
fn flatten(elf: &Path, out: &Path) -> Result<()> {
    let objcopy = std::env::var_os("OBJCOPY").unwrap_or_else(|| "rust-objcopy".into());
    let status = Command::new(&objcopy)
        .args(["-O", "binary"])
        .arg(elf)
        .arg(out)
        .status()
        .with_context(|| format!("running {}", objcopy.to_string_lossy()))?;

    if !status.success() {
        bail!("objcopy failed: {}", status);
    }
    Ok(())
}

fn package(soc: String, base: u32, out: PathBuf) -> Result<()> {
    if !SOCS.contains(&soc.as_str()) {
        bail!("unknown SoC {:?}, expected one of {}", soc, SOCS.join(", "));
    }

    let elf = build(&soc, base)?;
    flatten(&elf, &out)?;

    let len = std::fs::metadata(&out)
        .with_context(|| format!("reading {}", out.display()))?
        .len();
    println!("{soc}: {len} bytes at {base:#010x} -> {}", out.display());
    Ok(())
}

fn main() -> Result<()> {
    let xtask = Xtask::parse();

    match xtask {
        Xtask::Package { soc, base, out } => {
            package(soc, base, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses() {
        assert_eq!(parse_addr("0x22028000").unwrap(), 0x2202_8000);
        assert_eq!(parse_addr("0x2202_8000").unwrap(), 0x2202_8000);
        assert_eq!(parse_addr("4096").unwrap(), 4096);
        assert!(parse_addr("0xnope").is_err());
    }
}
