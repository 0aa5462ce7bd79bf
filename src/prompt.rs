//! Length-bounded terminal and stdin input.

use std::io::{self, BufRead, Read};

use zeroize::{Zeroize, Zeroizing};

use crate::error::Error;

/// Longest password line read from a prompt or stdin. Anything past the
/// credential width is rejected later by [`crate::securemem::Credential`].
pub const PASSWORD_INPUT_LIMIT: usize = 256;

/// Read one line of at most `limit` bytes, without its line terminator.
///
/// Returns `Ok(None)` at end of input. A longer line is consumed up to its
/// terminator and reported as [`Error::InputTooLong`], so a caller that
/// prompts again starts on a fresh line.
pub fn read_line<R: BufRead>(input: &mut R, limit: usize) -> Result<Option<Zeroizing<String>>, Error> {
    let mut buf = Zeroizing::new(Vec::new());
    // Room for the content plus "\r\n".
    let n = Read::take(&mut *input, limit as u64 + 2).read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    let terminated = buf.last() == Some(&b'\n');
    if terminated {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() > limit {
        if !terminated {
            discard_line(input)?;
        }
        return Err(Error::InputTooLong { limit });
    }
    match String::from_utf8(std::mem::take(&mut *buf)) {
        Ok(line) => Ok(Some(Zeroizing::new(line))),
        Err(err) => {
            err.into_bytes().zeroize();
            Err(Error::InvalidArgs("input is not valid UTF-8"))
        }
    }
}

fn discard_line<R: BufRead>(input: &mut R) -> io::Result<()> {
    loop {
        let available = input.fill_buf()?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(i) => {
                input.consume(i + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                input.consume(len);
            }
        }
    }
}

/// Ask for the device password on the controlling terminal without echo.
pub fn password_from_tty() -> Result<Zeroizing<String>, Error> {
    let pw = rpassword::prompt_password("Enter the device password: ")
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "password input failed"))?;
    let pw = Zeroizing::new(pw);
    if pw.len() > PASSWORD_INPUT_LIMIT {
        return Err(Error::InputTooLong {
            limit: PASSWORD_INPUT_LIMIT,
        });
    }
    Ok(pw)
}

/// Read the device password as the next line of stdin.
pub fn password_from_stdin() -> Result<Zeroizing<String>, Error> {
    let stdin = io::stdin();
    let mut lock = stdin.lock();
    read_line(&mut lock, PASSWORD_INPUT_LIMIT)?.ok_or(Error::Interrupted)
}
