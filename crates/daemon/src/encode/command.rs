//! External-program converter for docroute
//!
//! Runs a configured command line (pandoc, ebook-convert, soffice, ...) for a
//! single hop. Input bytes are staged into a private temp directory, the
//! program is pointed at them through argument placeholders, and the output
//! file it writes is read back.

use super::{ConvertRequest, Converter, ConverterError};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Characters of stderr kept in error messages
const STDERR_TAIL_CHARS: usize = 512;

/// Converter backed by an external program.
///
/// Placeholders substituted in every argument:
/// - `{input}`: staged input file path
/// - `{output}`: path the program must write
/// - `{from}` / `{to}`: format ids of the hop
#[derive(Debug, Clone, PartialEq)]
pub struct CommandConverter {
    program: String,
    args: Vec<String>,
}

impl CommandConverter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Build the command for one hop.
    ///
    /// The child is killed if the returned command's future is dropped, which
    /// is how job cancellation and timeouts stop a running program.
    pub fn build_command(
        &self,
        input_path: &Path,
        output_path: &Path,
        request: &ConvertRequest,
    ) -> Command {
        let input = input_path.to_string_lossy();
        let output = output_path.to_string_lossy();

        let mut cmd = Command::new(&self.program);
        for arg in &self.args {
            cmd.arg(
                arg.replace("{input}", &input)
                    .replace("{output}", &output)
                    .replace("{from}", &request.from)
                    .replace("{to}", &request.to),
            );
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Converter for CommandConverter {
    async fn convert(&self, input: Bytes, request: &ConvertRequest) -> Result<Bytes, ConverterError> {
        let workdir = tempfile::Builder::new().prefix("docroute-").tempdir()?;
        let input_path = workdir.path().join(format!("input.{}", request.from));
        let output_path = workdir.path().join(format!("output.{}", request.to));

        tokio::fs::write(&input_path, &input).await?;

        let mut cmd = self.build_command(&input_path, &output_path, request);
        tracing::debug!(
            job_id = %request.job_id,
            program = %self.program,
            from = %request.from,
            to = %request.to,
            "Running converter program"
        );

        let output = cmd.output().await?;

        if !output.status.success() {
            return Err(match output.status.code() {
                Some(code) => ConverterError::ProgramFailed {
                    program: self.program.clone(),
                    code,
                    stderr: stderr_tail(&output.stderr),
                },
                None => ConverterError::Terminated {
                    program: self.program.clone(),
                },
            });
        }

        match tokio::fs::read(&output_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ConverterError::MissingOutput(output_path))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_TAIL_CHARS {
        text.to_string()
    } else {
        text.chars().skip(count - STDERR_TAIL_CHARS).collect()
    }
}
