//! Line-oriented command interpreter over a [`Switch`].
//!
//! One command per line, words separated by whitespace. `write` and
//! `append` take the rest of the line as file contents. Blank lines and
//! lines starting with `#` are skipped.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use vnswitch_kernel::{
    At, Fd, FileType, IoContext, MemoryFs, MountFlags, OpenFlags, Switch, SwitchConfig,
};

const HELP: &str = "\
commands:
    mkdir PATH            create a directory
    rmdir PATH            remove an empty directory
    rm PATH               unlink a file or symlink
    write PATH TEXT...    replace a file's contents
    append PATH TEXT...   append a line to a file
    cat PATH              print a file
    ls [PATH]             list a directory
    ln [-s] TARGET PATH   hard or symbolic link
    readlink PATH         print a symlink's target
    mv OLD NEW            rename
    stat PATH             attributes as JSON
    cd PATH | pwd         working directory
    mount PATH [ro]       mount a fresh memfs on PATH
    umount PATH           unmount the namespace at PATH
    mounts                list mounted namespaces
    sync                  flush every namespace
    cache                 vnode cache statistics as JSON
    exit                  stop reading commands";

/// Read size for `cat`.
const CHUNK: usize = 4096;

/// Entries fetched per `readdir` for `ls`.
const LIST_BATCH: usize = 64;

/// Whether the interpreter should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell {
    switch: Switch,
    ctx: IoContext,
}

impl Shell {
    /// Build a switch with memfs mounted as `/`.
    pub fn boot(config: SwitchConfig) -> Result<Self> {
        let switch = Switch::new(config).context("invalid configuration")?;
        switch.register_filesystem("memfs", Arc::new(MemoryFs::new()), true)?;
        switch
            .mount_root("memfs", None, MountFlags::default(), None)
            .context("mounting root")?;
        let ctx = switch.new_io_context(None)?;
        tracing::info!("memfs mounted at /");
        Ok(Self { switch, ctx })
    }

    pub fn sync(&self) -> Result<()> {
        self.switch.sync().context("syncing namespaces")
    }

    /// Run every line of `input`. Failing commands are reported on `err`
    /// and do not stop the run; returns the number that failed.
    pub fn run(&self, input: impl BufRead, out: &mut impl Write, err: &mut impl Write) -> Result<usize> {
        let mut failures = 0;
        for (n, line) in input.lines().enumerate() {
            let line = line.context("reading commands")?;
            match self.execute(&line, out) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(e) => {
                    failures += 1;
                    writeln!(err, "vnsh: line {}: {:#}", n + 1, e)?;
                }
            }
        }
        Ok(failures)
    }

    /// Execute one command line.
    pub fn execute(&self, line: &str, out: &mut impl Write) -> Result<Flow> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(Flow::Continue);
        }
        let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim_start();
        let args: Vec<&str> = rest.split_whitespace().collect();
        tracing::debug!(cmd, ?args, "execute");

        match (cmd, args.as_slice()) {
            ("mkdir", [path]) => self.switch.mkdir(&self.ctx, At::Cwd, path, 0o755)?,
            ("rmdir", [path]) => self.switch.rmdir(&self.ctx, At::Cwd, path)?,
            ("rm", [path]) => self.switch.unlink(&self.ctx, At::Cwd, path)?,
            ("write", [path, ..]) => self.write(path, text_after(rest, path), false)?,
            ("append", [path, ..]) => self.write(path, text_after(rest, path), true)?,
            ("cat", [path]) => self.cat(path, out)?,
            ("ls", []) => self.ls(".", out)?,
            ("ls", [path]) => self.ls(path, out)?,
            ("ln", ["-s", target, path]) => self.switch.symlink(&self.ctx, target, At::Cwd, path)?,
            ("ln", [target, path]) => {
                self.switch
                    .link(&self.ctx, At::Cwd, target, At::Cwd, path)?
            }
            ("readlink", [path]) => {
                writeln!(out, "{}", self.switch.readlink(&self.ctx, At::Cwd, path)?)?
            }
            ("mv", [old, new]) => {
                self.switch
                    .rename(&self.ctx, At::Cwd, old, At::Cwd, new)?
            }
            ("stat", [path]) => {
                let attr = self.switch.rstat(&self.ctx, At::Cwd, path, false)?;
                writeln!(out, "{}", serde_json::to_string_pretty(&attr)?)?;
            }
            ("cd", [path]) => self.switch.chdir(&self.ctx, At::Cwd, path)?,
            ("pwd", []) => writeln!(out, "{}", self.switch.getcwd(&self.ctx)?)?,
            ("mount", [path]) => self.mount(path, MountFlags::default(), out)?,
            ("mount", [path, "ro"]) => self.mount(path, MountFlags::read_only(), out)?,
            ("umount", [path]) => self.switch.unmount(&self.ctx, At::Cwd, path)?,
            ("mounts", []) => {
                for m in self.switch.mounts() {
                    let on = m.covers.map_or_else(|| "/".to_string(), |k| k.to_string());
                    let mode = if m.read_only { "ro" } else { "rw" };
                    writeln!(out, "{} {} on {} ({})", m.id, m.fs_name, on, mode)?;
                }
            }
            ("sync", []) => self.switch.sync()?,
            ("cache", []) => {
                let stats = self.switch.cache_stats();
                writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?;
            }
            ("help", _) => writeln!(out, "{}", HELP)?,
            ("exit" | "quit", []) => return Ok(Flow::Exit),
            _ => bail!("bad command: {} (try `help`)", line),
        }
        Ok(Flow::Continue)
    }

    fn write(&self, path: &str, text: &str, append: bool) -> Result<()> {
        let flags = if append {
            OpenFlags {
                create: true,
                ..OpenFlags::append()
            }
        } else {
            OpenFlags::create_truncate()
        };
        let fd = self.switch.open(&self.ctx, At::Cwd, path, flags, 0o644)?;
        let mut data = text.as_bytes().to_vec();
        data.push(b'\n');
        let written = self.switch.write(&self.ctx, fd, &data);
        self.switch.close(&self.ctx, fd)?;
        written?;
        Ok(())
    }

    fn cat(&self, path: &str, out: &mut impl Write) -> Result<()> {
        let fd = self
            .switch
            .open(&self.ctx, At::Cwd, path, OpenFlags::read(), 0)?;
        let mut buf = vec![0; CHUNK];
        let copied = loop {
            match self.switch.read(&self.ctx, fd, &mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => out.write_all(&buf[..n])?,
                Err(e) => break Err(e),
            }
        };
        self.switch.close(&self.ctx, fd)?;
        Ok(copied?)
    }

    fn ls(&self, path: &str, out: &mut impl Write) -> Result<()> {
        let fd = self.switch.opendir(&self.ctx, At::Cwd, path)?;
        let listed = self.list(fd, out);
        self.switch.closedir(&self.ctx, fd)?;
        listed
    }

    fn list(&self, fd: Fd, out: &mut impl Write) -> Result<()> {
        loop {
            let batch = self.switch.readdir(&self.ctx, fd, LIST_BATCH)?;
            if batch.is_empty() {
                return Ok(());
            }
            for entry in batch {
                let suffix = match entry.kind {
                    FileType::Directory => "/",
                    FileType::Symlink => "@",
                    FileType::File => "",
                };
                writeln!(out, "{}{}", entry.name, suffix)?;
            }
        }
    }

    fn mount(&self, path: &str, flags: MountFlags, out: &mut impl Write) -> Result<()> {
        let ns = self
            .switch
            .mount(&self.ctx, At::Cwd, path, "memfs", None, flags, None)
            .with_context(|| format!("mounting memfs on {}", path))?;
        writeln!(out, "{}", ns)?;
        Ok(())
    }
}

/// Text following the first occurrence of `word` in `rest`.
fn text_after<'a>(rest: &'a str, word: &str) -> &'a str {
    rest.strip_prefix(word).unwrap_or(rest).trim_start()
}
