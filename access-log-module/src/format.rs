// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Helpers rendering individual log fields

use std::fmt::{Display, Formatter, Write};
use std::time::Duration;

fn write_byte(f: &mut Formatter<'_>, byte: u8) -> std::fmt::Result {
    write!(f, "\\x{byte:02x}")
}

/// Renders the value or `-` if there is none
#[derive(Debug)]
pub(crate) struct OrDash<T>(pub(crate) Option<T>);

impl<T: Display> Display for OrDash<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.write_char('-'),
        }
    }
}

/// Renders data in double quotes, escaping quotes, backslashes and non-printable bytes
#[derive(Debug)]
pub(crate) struct Quoted<'a>(pub(crate) &'a [u8]);

impl Display for Quoted<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fn is_allowed(byte: u8) -> bool {
            (b' '..=b'~').contains(&byte) && byte != b'"' && byte != b'\\'
        }

        f.write_char('"')?;
        for &byte in self.0 {
            if is_allowed(byte) {
                f.write_char(char::from(byte))?;
            } else {
                write_byte(f, byte)?;
            }
        }
        f.write_char('"')
    }
}

/// Renders data as a single space-free token, `-` if missing or empty
///
/// Spaces become `+`, backslashes and non-printable bytes are escaped.
#[derive(Debug)]
pub(crate) struct Token<'a>(pub(crate) Option<&'a [u8]>);

impl Display for Token<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let data = match self.0 {
            Some(data) if !data.is_empty() => data,
            _ => return f.write_char('-'),
        };

        for &byte in data {
            match byte {
                b' ' => f.write_char('+')?,
                b'\\' => write_byte(f, byte)?,
                b'!'..=b'~' => f.write_char(char::from(byte))?,
                _ => write_byte(f, byte)?,
            }
        }
        Ok(())
    }
}

/// Renders a duration in seconds with millisecond precision
#[derive(Debug)]
pub(crate) struct Seconds(pub(crate) Duration);

impl Display for Seconds {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.0.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(Quoted(b"abcd").to_string(), "\"abcd\"");
        assert_eq!(
            Quoted(b"\0ab\"\\+-=! cd").to_string(),
            "\"\\x00ab\\x22\\x5c+-=! cd\""
        );
        assert_eq!(
            Quoted(b"ab~\x7f\x80\xfe\xffcd").to_string(),
            "\"ab~\\x7f\\x80\\xfe\\xffcd\""
        );
    }

    #[test]
    fn tokens() {
        assert_eq!(Token(None).to_string(), "-");
        assert_eq!(Token(Some(b"".as_slice())).to_string(), "-");
        assert_eq!(Token(Some(b"TestAgent/1.0".as_slice())).to_string(), "TestAgent/1.0");
        assert_eq!(
            Token(Some(b"Mozilla/5.0 (X11; Linux)".as_slice())).to_string(),
            "Mozilla/5.0+(X11;+Linux)"
        );
        assert_eq!(
            Token(Some(b"a\tb\\c\"d\x80".as_slice())).to_string(),
            "a\\x09b\\x5cc\"d\\x80"
        );
    }

    #[test]
    fn dashes_and_seconds() {
        assert_eq!(OrDash(Some(200)).to_string(), "200");
        assert_eq!(OrDash(None::<u16>).to_string(), "-");
        assert_eq!(Seconds(Duration::from_millis(50)).to_string(), "0.050");
        assert_eq!(Seconds(Duration::from_nanos(1234567890)).to_string(), "1.235");
    }
}
