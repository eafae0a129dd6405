use std::path::PathBuf;

use alloy_primitives::U256;
use clap::{Args, Parser, Subcommand};
use devnet_wallet::Felt;

#[derive(Parser, Debug)]
#[command(name = "devnet-wallet", version, about = "Devnet wallet: balances, top-ups and contract workflows")]
pub struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Config file (default ~/.devnet-wallet/config.json)"
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the account's token balance and symbol (no signer needed)
    Balance {
        #[arg(long, help = "Token address (default: fee token)")]
        token: Option<Felt>,
    },
    /// Mint or return funds until the fee-token balance equals the target
    Topup(TopupArgs),
    /// Transfer tokens to another account
    Send(SendArgs),
    /// Declare a contract class unless it is already declared
    Declare(DeclareArgs),
    /// Deploy a declared class through the Universal Deployer
    Deploy(DeployArgs),
    /// Sign typed data
    Sign {
        #[arg(long, value_name = "FILE", help = "Typed data JSON file")]
        typed_data: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct TopupArgs {
    #[arg(long, value_parser = parse_amount, help = "Target balance in base units")]
    pub target: U256,
    #[arg(long, help = "Send any surplus above the target to the sink address")]
    pub return_excess: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[arg(long, help = "Recipient address")]
    pub to: Felt,
    #[arg(long, value_parser = parse_amount, help = "Amount in base units")]
    pub amount: U256,
    #[arg(long, help = "Token address (default: fee token)")]
    pub token: Option<Felt>,
}

#[derive(Args, Debug)]
pub struct DeclareArgs {
    #[arg(long, value_name = "FILE", help = "Sierra contract class JSON")]
    pub sierra: PathBuf,
    #[arg(long, value_name = "FILE", help = "Compiled CASM JSON")]
    pub casm: PathBuf,
    #[arg(long, help = "Class hash, enables the already-declared check")]
    pub class_hash: Option<Felt>,
    #[arg(long, help = "Compiled class hash forwarded to the signer")]
    pub compiled_class_hash: Option<Felt>,
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    #[arg(long)]
    pub class_hash: Felt,
    #[arg(
        long,
        default_value = "[]",
        help = "Constructor arguments as a JSON object or array"
    )]
    pub args: String,
}

/// Decimal or `0x` hex.
pub fn parse_amount(raw: &str) -> Result<U256, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(raw, 10),
    };
    parsed.map_err(|e| format!("invalid amount {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_topup() {
        let cli = Cli::try_parse_from([
            "devnet-wallet",
            "topup",
            "--target",
            "25000000000000000000",
            "--return-excess",
        ])
        .unwrap();
        match cli.command {
            Command::Topup(args) => {
                assert_eq!(args.target, U256::from(25_000_000_000_000_000_000u128));
                assert!(args.return_excess);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_send_with_hex_values() {
        let cli = Cli::try_parse_from([
            "devnet-wallet",
            "--config",
            "/tmp/c.json",
            "send",
            "--to",
            "0xbeef",
            "--amount",
            "0x14",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.to, Felt::from(0xbeefu64));
                assert_eq!(args.amount, U256::from(20u8));
                assert!(args.token.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_amount() {
        assert!(parse_amount("12abc").is_err());
        assert!(Cli::try_parse_from(["devnet-wallet", "send", "--to", "0x1", "--amount", "-5"]).is_err());
    }
}
