use anyhow::{anyhow, Context, Result};
use ethers::prelude::*;
use ethers::types::transaction::eip712::{Eip712, TypedData};
use ethers::utils::hex;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::str::FromStr;

use crate::types::Side;

// Opinion CTF Exchange on BNB Chain
pub const EXCHANGE_ADDRESS: &str = "0x5f45344126d6488025b0b84a3a8189f2487a7246";
pub const CHAIN_ID: u64 = 56;
const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
/// Multisig (proxy wallet) signatures
const SIGNATURE_TYPE: u8 = 2;

/// Signed order fields as the exchange expects them
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub salt: String,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub side: u8,
    pub signature: String,
}

/// EIP-712 order signer: the wallet signs, the multisig is the maker
pub struct OrderSigner {
    wallet: LocalWallet,
    address: Address,
    maker: Address,
}

impl OrderSigner {
    pub fn new(private_key: &str, maker_address: Option<&str>) -> Result<Self> {
        let wallet = private_key
            .parse::<LocalWallet>()
            .context("Invalid private key")?
            .with_chain_id(CHAIN_ID);

        let address = wallet.address();
        let maker = match maker_address {
            Some(addr) => Address::from_str(addr).context("Invalid multisig address")?,
            None => address,
        };

        Ok(Self {
            wallet,
            address,
            maker,
        })
    }

    pub fn signer_address(&self) -> String {
        format!("{:?}", self.address)
    }

    /// Build and sign a limit order for `shares` at `price`
    pub fn create_order(&self, token_id: &str, price: Decimal, shares: Decimal, side: Side) -> Result<SignedOrder> {
        // BUY: pay USDT (maker), receive shares (taker)
        // SELL: give shares (maker), receive USDT (taker)
        let cost = price * shares;
        let (maker_amount, taker_amount) = match side {
            Side::Buy => (to_wei(cost)?, to_wei(shares)?),
            Side::Sell => (to_wei(shares)?, to_wei(cost)?),
        };

        let salt = chrono::Utc::now().timestamp_millis().to_string();
        let side_flag = match side {
            Side::Buy => 0u8,
            Side::Sell => 1u8,
        };
        let maker = format!("{:?}", self.maker);
        let signer = self.signer_address();

        let message = json!({
            "salt": salt,
            "maker": maker,
            "signer": signer,
            "taker": ZERO_ADDRESS,
            "tokenId": token_id,
            "makerAmount": maker_amount,
            "takerAmount": taker_amount,
            "expiration": "0",
            "nonce": "0",
            "feeRateBps": "0",
            "side": side_flag,
            "signatureType": SIGNATURE_TYPE
        });

        let signature = self.sign_order(message)?;

        Ok(SignedOrder {
            salt,
            maker,
            signer,
            taker: ZERO_ADDRESS.to_string(),
            token_id: token_id.to_string(),
            maker_amount,
            taker_amount,
            side: side_flag,
            signature,
        })
    }

    fn sign_order(&self, message: serde_json::Value) -> Result<String> {
        let typed_data = json!({
            "types": {
                "EIP712Domain": [
                    {"name": "name", "type": "string"},
                    {"name": "version", "type": "string"},
                    {"name": "chainId", "type": "uint256"},
                    {"name": "verifyingContract", "type": "address"}
                ],
                "Order": [
                    {"name": "salt", "type": "uint256"},
                    {"name": "maker", "type": "address"},
                    {"name": "signer", "type": "address"},
                    {"name": "taker", "type": "address"},
                    {"name": "tokenId", "type": "uint256"},
                    {"name": "makerAmount", "type": "uint256"},
                    {"name": "takerAmount", "type": "uint256"},
                    {"name": "expiration", "type": "uint256"},
                    {"name": "nonce", "type": "uint256"},
                    {"name": "feeRateBps", "type": "uint256"},
                    {"name": "side", "type": "uint8"},
                    {"name": "signatureType", "type": "uint8"}
                ]
            },
            "primaryType": "Order",
            "domain": {
                "name": "OPINION CTF Exchange",
                "version": "1",
                "chainId": CHAIN_ID,
                "verifyingContract": EXCHANGE_ADDRESS
            },
            "message": message
        });

        let typed_data: TypedData = serde_json::from_value(typed_data)?;
        let hash = typed_data.encode_eip712()?;
        let signature = self.wallet.sign_hash(H256::from(hash))?;

        Ok(format!("0x{}", hex::encode(signature.to_vec())))
    }
}

/// 18-decimal integer string, truncated
pub fn to_wei(amount: Decimal) -> Result<String> {
    let scaled = amount
        .checked_mul(Decimal::from(1_000_000_000_000_000_000u64))
        .ok_or_else(|| anyhow!("Amount {} overflows wei conversion", amount))?;
    Ok(scaled.trunc().normalize().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // Well-known test key (hardhat account #0)
    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_to_wei() {
        assert_eq!(to_wei(dec!(1)).unwrap(), "1000000000000000000");
        assert_eq!(to_wei(dec!(0.5)).unwrap(), "500000000000000000");
        assert_eq!(to_wei(dec!(0)).unwrap(), "0");
    }

    #[test]
    fn test_buy_order_amounts_and_signature() {
        let signer = OrderSigner::new(TEST_KEY, None).unwrap();
        let order = signer
            .create_order("123", dec!(0.5), dec!(10), Side::Buy)
            .unwrap();

        assert_eq!(order.maker_amount, "5000000000000000000");
        assert_eq!(order.taker_amount, "10000000000000000000");
        assert_eq!(order.side, 0);
        assert_eq!(order.maker, order.signer);
        assert!(order.signature.starts_with("0x"));
        assert_eq!(order.signature.len(), 2 + 130);
    }

    #[test]
    fn test_sell_order_uses_multisig_maker() {
        let signer = OrderSigner::new(
            TEST_KEY,
            Some("0x00000000000000000000000000000000000000aa"),
        )
        .unwrap();
        let order = signer
            .create_order("123", dec!(0.4), dec!(5), Side::Sell)
            .unwrap();

        assert_eq!(order.maker_amount, "5000000000000000000");
        assert_eq!(order.taker_amount, "2000000000000000000");
        assert_ne!(order.maker, order.signer);
    }
}
