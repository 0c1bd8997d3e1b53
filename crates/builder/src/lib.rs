// This file is part of Rundler.
//
// Rundler is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Rundler is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Rundler.
// If not, see https://www.gnu.org/licenses/.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]
//! Bundle building, submission and the execution manager driving them.
//!
//! ## Feature Flags
//!
//! - `test-utils`: Export mocks of the builder traits.

mod bundle_proposer;
#[cfg(feature = "test-utils")]
pub use bundle_proposer::MockBundleProposer;
pub use bundle_proposer::{
    Bundle, BundleProposer, BundleProposerImpl, Settings as ProposerSettings,
    THROTTLED_ENTITY_BUNDLE_COUNT,
};

mod bundle_sender;
#[cfg(feature = "test-utils")]
pub use bundle_sender::MockBundleSender;
pub use bundle_sender::{BundleSender, BundleSenderImpl, Settings as BundleSenderSettings};

mod bundler;
#[cfg(feature = "test-utils")]
pub use bundler::MockBundler;
pub use bundler::{Bundler, BundlerImpl};

mod execution_manager;
#[cfg(feature = "test-utils")]
pub use execution_manager::MockBundlerHandle;
pub use execution_manager::{BundlerHandle, ExecutionManager, Settings as ExecutionSettings};

mod sender;
#[cfg(feature = "test-utils")]
pub use sender::MockTransactionSender;
pub use sender::{RawTransactionSender, SentTxInfo, TransactionSender, TxSenderError};

mod signer;
pub use signer::{LocalSigner, Signer};
