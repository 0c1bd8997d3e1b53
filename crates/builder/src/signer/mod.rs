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

mod local;

use std::time::Duration;

use aa_bundler_provider::{EvmProvider, TransactionRequest};
use alloy_consensus::{SignableTransaction, TxEnvelope, TypedTransaction};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, B256};
use alloy_signer::Signature;
use anyhow::{bail, Context};
pub use local::LocalSigner;
use metrics::Gauge;
use metrics_derive::Metrics;

const BALANCE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Signs bundle transactions
#[async_trait::async_trait]
pub trait Signer: Send + Sync + 'static {
    /// Address of the signing account
    fn address(&self) -> Address;

    /// Chain the signed transactions are valid on
    fn chain_id(&self) -> u64;

    /// Sign a 32 byte hash
    async fn sign_hash(&self, hash: &B256) -> anyhow::Result<Signature>;

    /// Sign an EIP-1559 transaction, returning its encoding and nonce
    async fn fill_and_sign(&self, mut tx: TransactionRequest) -> anyhow::Result<(Bytes, u64)> {
        tx.from = Some(self.address());
        tx.chain_id = Some(self.chain_id());

        let nonce = tx
            .nonce
            .context("nonce should be set when transaction is filled")?;

        let typed = tx
            .build_typed_tx()
            .map_err(|_| anyhow::anyhow!("transaction request is missing fields"))?;
        let TypedTransaction::Eip1559(tx_1559) = typed else {
            bail!("transaction is not eip1559");
        };

        let tx_hash = tx_1559.signature_hash();
        let signature = self
            .sign_hash(&tx_hash)
            .await
            .context("should sign transaction before sending")?;

        let signed: TxEnvelope = tx_1559.into_signed(signature).into();

        let mut encoded = vec![];
        signed.encode_2718(&mut encoded);

        Ok((encoded.into(), nonce))
    }
}

#[derive(Metrics)]
#[metrics(scope = "bundle_builder")]
struct BuilderMetric {
    #[metric(describe = "the balance of bundler builder.")]
    account_balance: Gauge,
}

pub(crate) async fn monitor_account_balance<P: EvmProvider>(addr: Address, provider: P) {
    let metric = BuilderMetric::new_with_labels(&[("addr", format!("{addr:?}"))]);
    loop {
        match provider.get_balance(addr, None).await {
            Ok(balance) => {
                let eth_balance = f64::from(balance) / 1e18;
                tracing::info!("account {addr:?} balance: {}", eth_balance);
                metric.account_balance.set(eth_balance);
            }
            Err(err) => {
                tracing::error!("Get account {addr:?} balance error {err:?}");
            }
        };
        tokio::time::sleep(BALANCE_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use alloy_eips::eip2718::Decodable2718;
    use alloy_primitives::U256;

    use super::*;

    // anvil's first dev account
    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[tokio::test]
    async fn signs_eip1559_transaction() {
        let signer = LocalSigner::from_private_key(KEY, 1337).unwrap();
        let tx = TransactionRequest::default()
            .to(Address::repeat_byte(0xee))
            .nonce(7)
            .gas_limit(10_000_000)
            .max_fee_per_gas(100)
            .max_priority_fee_per_gas(10)
            .value(U256::ZERO);

        let (raw, nonce) = signer.fill_and_sign(tx).await.unwrap();
        assert_eq!(nonce, 7);

        let envelope = TxEnvelope::decode_2718(&mut raw.as_ref()).unwrap();
        let TxEnvelope::Eip1559(signed) = envelope else {
            panic!("expected an eip1559 transaction");
        };
        assert_eq!(signed.tx().chain_id, 1337);
        assert_eq!(signed.tx().nonce, 7);
        let recovered = signed
            .signature()
            .recover_address_from_prehash(&signed.signature_hash())
            .unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[tokio::test]
    async fn requires_nonce() {
        let signer = LocalSigner::from_private_key(KEY, 1).unwrap();
        let tx = TransactionRequest::default()
            .to(Address::ZERO)
            .gas_limit(21_000)
            .max_fee_per_gas(1)
            .max_priority_fee_per_gas(1);
        assert!(signer.fill_and_sign(tx).await.is_err());
    }
}
