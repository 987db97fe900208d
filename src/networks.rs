//! Registry of USDC deployments on the networks this server can charge on.
//!
//! x402 protocol v1 identifies chains by network name (e.g. "base-sepolia").
//! Each entry carries the token contract address, its decimal places, and the
//! EIP-712 domain fields that buyers need to sign an `exact` scheme payment.

use serde_json::json;

/// A USDC token deployment on one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsdcDeployment {
    /// x402 v1 network name.
    pub network: &'static str,
    /// Token contract address.
    pub asset: &'static str,
    /// Token decimal places.
    pub decimals: u32,
    /// EIP-712 domain name of the token contract.
    pub eip712_name: &'static str,
    /// EIP-712 domain version of the token contract.
    pub eip712_version: &'static str,
}

static USDC_DEPLOYMENTS: [UsdcDeployment; 5] = [
    UsdcDeployment {
        network: "base",
        asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
        decimals: 6,
        eip712_name: "USD Coin",
        eip712_version: "2",
    },
    UsdcDeployment {
        network: "base-sepolia",
        asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
        decimals: 6,
        eip712_name: "USDC",
        eip712_version: "2",
    },
    UsdcDeployment {
        network: "polygon",
        asset: "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359",
        decimals: 6,
        eip712_name: "USDC",
        eip712_version: "2",
    },
    UsdcDeployment {
        network: "polygon-amoy",
        asset: "0x41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582",
        decimals: 6,
        eip712_name: "USDC",
        eip712_version: "2",
    },
    UsdcDeployment {
        network: "avalanche",
        asset: "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E",
        decimals: 6,
        eip712_name: "USD Coin",
        eip712_version: "2",
    },
];

impl UsdcDeployment {
    /// Looks up the USDC deployment for an x402 v1 network name.
    pub fn by_network(network: &str) -> Option<&'static UsdcDeployment> {
        USDC_DEPLOYMENTS.iter().find(|d| d.network == network)
    }

    /// EIP-712 domain fields in the shape expected by the `extra` field of
    /// payment requirements.
    pub fn eip712_extra(&self) -> serde_json::Value {
        json!({
            "name": self.eip712_name,
            "version": self.eip712_version,
        })
    }
}
