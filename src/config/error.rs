// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with resampler configuration.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Argument file '{}' doesn't have a recognised file extension! Valid extensions are: {valid}", .file.display())]
    UnrecognisedExtension { file: PathBuf, valid: String },

    #[error("Couldn't decode toml structure from {}:\n{err}", .file.display())]
    Toml { file: PathBuf, err: toml::de::Error },

    #[error("Couldn't decode json structure from {}:\n{err}", .file.display())]
    Json {
        file: PathBuf,
        err: serde_json::Error,
    },

    #[error("The number of gridding threads must be at least 1")]
    ZeroThreads,

    #[error("The grid tile size must be at least 1 pixel")]
    ZeroTileSize,

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
