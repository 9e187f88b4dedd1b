// Copyright 2020-2022 Amazon Web Services, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Error types adapted from AWS CloudFormation Guard

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unknown intrinsic function tag !{0}")]
    UnknownTag(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] InternalError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InternalError {
    #[error("mapping key must be a scalar, found {0}")]
    InvalidKeyType(String),

    #[error("number {0} has no JSON representation")]
    InvalidNumber(String),
}

impl From<serde_yml::Error> for Error {
    fn from(err: serde_yml::Error) -> Self {
        Error::ParseError(err.to_string())
    }
}
