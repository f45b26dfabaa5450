// SPDX-License-Identifier: AGPL-3.0-only

//! The three archive-pipeline stages built on [`crate::process::ChildFilter`]:
//! the archiver, the compressor, and the encryptor.

pub use self::{
    compressor::Compressor,
    encryptor::Encryptor,
    tar::{TarCreator, TarLister},
};

mod compressor;
mod encryptor;
mod tar;
