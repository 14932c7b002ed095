//! Utilies for [`std::process::Command`].

use std::{ffi::OsStr, fmt, io, process};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("empty commmand provided")]
    Empty,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("`{command}` exited with {}: {}", .output.status, .output.combined().trim())]
    NonZero { command: String, output: Output },
}

#[derive(Debug, Clone)]
pub struct Output {
    pub status: process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    /// Standard output followed by standard error.
    pub fn combined(&self) -> String {
        let mut combined = String::with_capacity(self.stdout.len() + self.stderr.len());
        combined.push_str(&self.stdout);
        combined.push_str(&self.stderr);
        combined
    }
}

impl From<process::Output> for Output {
    fn from(value: process::Output) -> Self {
        Self {
            status: value.status,
            stdout: String::from_utf8_lossy(&value.stdout).to_string(),
            stderr: String::from_utf8_lossy(&value.stderr).to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy)]
pub struct Runner;

impl Runner {
    /// Runs the program named by the first argument with the remaining ones, waiting for it to
    /// exit. A non-zero exit status is returned as [`Error::NonZero`] with the captured output.
    pub fn run<S: AsRef<OsStr>>(args: &[S]) -> Result<Output> {
        let (program, args) = args.split_first().ok_or(Error::Empty)?;
        let mut cmd = process::Command::new(program);
        cmd.args(args)
            .stdin(process::Stdio::null())
            .stderr(process::Stdio::piped())
            .stdout(process::Stdio::piped());

        tracing::debug!(?cmd, "running command");

        let output: Output = cmd.spawn()?.wait_with_output()?.into();

        if !output.status.success() {
            tracing::debug!(?output.stderr, ?output.status, ?cmd, "command returned non-zero status");
            let command = Joined(std::iter::once(program).chain(args)).to_string();
            return Err(Error::NonZero { command, output });
        }

        Ok(output)
    }
}

struct Joined<I>(I);

impl<I, S> fmt::Display for Joined<I>
where
    I: Iterator<Item = S> + Clone,
    S: AsRef<OsStr>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.0.clone().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", arg.as_ref().to_string_lossy())?;
        }
        Ok(())
    }
}
