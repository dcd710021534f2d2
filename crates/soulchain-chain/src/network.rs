//! Known ledger networks.

use crate::provider::TxHash;

/// Connection details for a public or local ledger network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    pub key: &'static str,
    pub name: &'static str,
    pub rpc_url: &'static str,
    pub chain_id: u64,
    pub explorer_url: Option<&'static str>,
}

impl Network {
    /// Explorer link for a transaction, if the network has an explorer.
    pub fn tx_url(&self, tx: &TxHash) -> Option<String> {
        self.explorer_url.map(|base| format!("{base}/tx/{tx}"))
    }
}

pub const NETWORKS: &[Network] = &[
    Network {
        key: "base",
        name: "Base",
        rpc_url: "https://mainnet.base.org",
        chain_id: 8453,
        explorer_url: Some("https://basescan.org"),
    },
    Network {
        key: "base-sepolia",
        name: "Base Sepolia",
        rpc_url: "https://sepolia.base.org",
        chain_id: 84532,
        explorer_url: Some("https://sepolia.basescan.org"),
    },
    Network {
        key: "arbitrum",
        name: "Arbitrum One",
        rpc_url: "https://arb1.arbitrum.io/rpc",
        chain_id: 42161,
        explorer_url: Some("https://arbiscan.io"),
    },
    Network {
        key: "optimism",
        name: "Optimism",
        rpc_url: "https://mainnet.optimism.io",
        chain_id: 10,
        explorer_url: Some("https://optimistic.etherscan.io"),
    },
    Network {
        key: "polygon",
        name: "Polygon",
        rpc_url: "https://polygon-rpc.com",
        chain_id: 137,
        explorer_url: Some("https://polygonscan.com"),
    },
    Network {
        key: "ethereum",
        name: "Ethereum",
        rpc_url: "https://eth.drpc.org",
        chain_id: 1,
        explorer_url: Some("https://etherscan.io"),
    },
    Network {
        key: "localhost",
        name: "Local",
        rpc_url: "http://127.0.0.1:8545",
        chain_id: 31337,
        explorer_url: None,
    },
];

/// Look up a network preset by key, e.g. `"base-sepolia"`.
pub fn network(key: &str) -> Option<&'static Network> {
    NETWORKS.iter().find(|n| n.key == key)
}
