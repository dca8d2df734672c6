//! Bitstream loading through the external JTAG programmer.
//!
//! The programmer (Vivado in batch mode) is handed a generated TCL script
//! and its combined output is captured to a `.result` file next to it.
//! Success is judged from the output text alone: the first line whose
//! first whitespace-delimited token is `ERROR:` is the load error, and no
//! output at all means the programmer is not there. The process exit
//! status is not trusted.

use std::io::Write;
use std::path::Path;
use std::process::Command;

/// Which FPGA a script programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitstreamKind {
    /// The ECD-Master FPGA on the host card.
    Master,
    /// The downstream ECD FPGA.
    Ecd,
}

impl BitstreamKind {
    /// Stem of the generated `.tcl` and `.result` artifact files.
    #[must_use]
    pub const fn file_stem(self) -> &'static str {
        match self {
            Self::Master => "load_master_bitstream",
            Self::Ecd => "load_ecd_bitstream",
        }
    }
}

/// Runs the JTAG programmer for one bitstream kind.
#[derive(Debug, Clone, Copy)]
pub struct BitstreamLoader<'a> {
    tmp_dir: &'a Path,
    vivado: &'a Path,
}

impl<'a> BitstreamLoader<'a> {
    /// A loader writing its artifacts under `tmp_dir` and invoking the
    /// programmer at `vivado`.
    #[must_use]
    pub const fn new(tmp_dir: &'a Path, vivado: &'a Path) -> Self {
        Self { tmp_dir, vivado }
    }

    /// Program one bitstream. Returns `None` on success or the load error
    /// text; never fails the process over a bad load.
    ///
    /// On exit the TCL script is at `<tmp_dir>/<stem>.tcl` and the
    /// captured programmer output at `<tmp_dir>/<stem>.result`.
    pub fn load(&self, kind: BitstreamKind, script: &[String]) -> Option<String> {
        let stem = kind.file_stem();
        let tcl_path = self.tmp_dir.join(format!("{stem}.tcl"));
        let result_path = self.tmp_dir.join(format!("{stem}.result"));

        if let Err(e) = write_lines(&tcl_path, script) {
            return Some(format!("Can't write {}: {e}", tcl_path.display()));
        }

        // The 2>&1 keeps parity with the documented invocation: the
        // programmer reports JTAG failures on stderr, and the text scan
        // below must see them.
        let command = format!(
            "{} 2>&1 -nojournal -nolog -mode batch -source {}",
            self.vivado.display(),
            tcl_path.display()
        );
        tracing::info!(%command, "loading {stem}");

        let output = match Command::new("sh").arg("-c").arg(&command).output() {
            Ok(output) => output,
            Err(e) => return Some(format!("Can't run {}: {e}", self.vivado.display())),
        };
        tracing::debug!(status = %output.status, "programmer exited");

        let lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();

        if let Err(e) = write_lines(&result_path, &lines) {
            tracing::warn!("can't persist programmer output to {}: {e}", result_path.display());
        }

        if lines.is_empty() {
            return Some(format!(
                "no output from {} (programmer not found?)",
                self.vivado.display()
            ));
        }

        lines
            .iter()
            .find(|line| line.split_whitespace().next() == Some("ERROR:"))
            .cloned()
    }
}

fn write_lines(path: &Path, lines: &[String]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    for line in lines {
        writeln!(file, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    /// A scratch dir with a stub programmer that prints `output_lines`.
    fn stub_programmer(name: &str, output_lines: &[&str]) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("ecd-loader-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut body = String::from("#!/bin/sh\n");
        for line in output_lines {
            body.push_str(&format!("echo \"{line}\"\n"));
        }
        let stub = dir.join("vivado-stub");
        std::fs::write(&stub, body).unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        (dir, stub)
    }

    fn script() -> Vec<String> {
        vec!["open_hw".to_string(), "program_hw_devices".to_string()]
    }

    #[test]
    fn clean_output_loads_successfully() {
        let (dir, stub) = stub_programmer("ok", &["INFO: ok", "INFO: done"]);
        let loader = BitstreamLoader::new(&dir, &stub);

        assert_eq!(loader.load(BitstreamKind::Master, &script()), None);

        let tcl = std::fs::read_to_string(dir.join("load_master_bitstream.tcl")).unwrap();
        assert_eq!(tcl, "open_hw\nprogram_hw_devices\n");
        let result = std::fs::read_to_string(dir.join("load_master_bitstream.result")).unwrap();
        assert_eq!(result, "INFO: ok\nINFO: done\n");
    }

    #[test]
    fn first_error_line_wins() {
        let (dir, stub) = stub_programmer(
            "err",
            &["INFO: ok", "ERROR: bad bit file", "ERROR: second"],
        );
        let loader = BitstreamLoader::new(&dir, &stub);

        assert_eq!(
            loader.load(BitstreamKind::Master, &script()),
            Some("ERROR: bad bit file".to_string())
        );
    }

    #[test]
    fn error_token_must_be_the_first_word() {
        let (dir, stub) = stub_programmer("token", &["saw ERROR: earlier", "INFO: fine"]);
        let loader = BitstreamLoader::new(&dir, &stub);

        assert_eq!(loader.load(BitstreamKind::Ecd, &script()), None);
    }

    #[test]
    fn empty_output_means_programmer_missing() {
        let (dir, stub) = stub_programmer("empty", &[]);
        let loader = BitstreamLoader::new(&dir, &stub);

        let err = loader.load(BitstreamKind::Ecd, &script()).unwrap();
        assert!(err.contains("no output"), "got: {err}");
    }

    #[test]
    fn ecd_kind_uses_its_own_artifacts() {
        let (dir, stub) = stub_programmer("kind", &["INFO: ok"]);
        let loader = BitstreamLoader::new(&dir, &stub);

        assert_eq!(loader.load(BitstreamKind::Ecd, &script()), None);
        assert!(dir.join("load_ecd_bitstream.tcl").exists());
        assert!(dir.join("load_ecd_bitstream.result").exists());
    }
}
