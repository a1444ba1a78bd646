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

//! Error type shared by request filters and their hosts

use std::borrow::Cow;
use std::fmt::{Display, Formatter};

/// Cause of an error, any boxed standard error
pub type ErrorCause = Box<dyn std::error::Error + Send + Sync>;

/// Classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Request header could not be parsed or built
    InvalidHTTPHeader,
    /// Failed writing response data
    WriteError,
    /// Failed opening a file
    FileOpenError,
    /// Failed reading a file
    FileReadError,
    /// Configuration settings are invalid
    InvalidConfig,
    /// Unexpected internal state
    InternalError,
}

impl Display for ErrorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Optional part of the error message, omitted along with its label if missing
struct Part<'a, T: ?Sized>(&'static str, Option<&'a T>);

impl<T: Display + ?Sized> Display for Part<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(value) = self.1 {
            write!(f, " {}: {value}", self.0)?;
        }
        Ok(())
    }
}

/// An error produced while processing a request
#[derive(Debug, thiserror::Error)]
#[error(
    "{etype}{}{}",
    Part("context", .context.as_deref()),
    Part("cause", .cause.as_deref())
)]
pub struct Error {
    /// Error classification
    pub etype: ErrorType,
    /// Description of what went wrong
    pub context: Option<Cow<'static, str>>,
    /// The underlying error if any
    #[source]
    pub cause: Option<ErrorCause>,
}

impl Error {
    /// Creates a new error of the given type without context.
    pub fn new(etype: ErrorType) -> Box<Self> {
        Box::new(Self {
            etype,
            context: None,
            cause: None,
        })
    }

    /// Creates a new error of the given type with a description.
    pub fn explain(etype: ErrorType, context: impl Into<Cow<'static, str>>) -> Box<Self> {
        Box::new(Self {
            etype,
            context: Some(context.into()),
            cause: None,
        })
    }

    /// Creates a new error of the given type, caused by another error.
    pub fn because(
        etype: ErrorType,
        context: impl Into<Cow<'static, str>>,
        cause: impl Into<ErrorCause>,
    ) -> Box<Self> {
        Box::new(Self {
            etype,
            context: Some(context.into()),
            cause: Some(cause.into()),
        })
    }
}
