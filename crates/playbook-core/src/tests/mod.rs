
use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{keccak256, Address, TxKind, B256, U256};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use self::mock::{MockClient, MockConnector, MockKeyCache};
use crate::client::EthClient;
use crate::errors::{ConfirmationFailure, PlaybookError, PlaybookResult, ValidationSite};
use crate::executor::{await_confirmation, AwaitPolicy, Executor, TX_MARKER};
use crate::manifest::PlaybookFile;
use crate::spec::{Invocation, Spec, ValidationContext, Validated};
use crate::Context;

const ALICE: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
const BOB: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
const CAROL: &str = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC";
const USDT: &str = "0x00000000000000000000000000000000000000aa";

const TOKEN_ARTIFACT: &str = r#"{
    "abi": [
        {"type":"constructor","inputs":[{"name":"supply","type":"uint256"}],"stateMutability":"nonpayable"},
        {"type":"function","name":"symbol","inputs":[],"outputs":[{"name":"","type":"string"}],"stateMutability":"view"},
        {"type":"function","name":"balanceOf","inputs":[{"name":"owner","type":"address"}],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
        {"type":"function","name":"transfer","inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[{"name":"","type":"bool"}],"stateMutability":"nonpayable"},
        {"type":"function","name":"mint","inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"}
    ],
    "bytecode": "0x6080"
}"#;

const PLAYBOOK: &str = r#"
CONFIG:
  gasPrice: 1000000000
  chainID: 1337
  awaitTimeout: 1s
INVENTORY:
  genesis:
    - http://dead:8545
    - http://localhost:8545
WALLETS:
  alice:
    privkey: "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
  bob:
    privkey: "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"
  carol:
    privkey: "5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a"
CONTRACTS:
  Token:
    artifact: Token.json
    instances:
      - name: token
      - name: usdt
        address: "0x00000000000000000000000000000000000000aa"
CALL:
  balances:
    description: Balance of every wallet
    wallet: ".*"
    method: eth_getBalance
    params:
      - type: address
        reference: "@"
      - latest
  broken:
    method: eth_fail
    wallet: "alice|bob"
READ:
  holdings:
    wallet: "alice|bob|carol"
    method: balanceOf
    instance: token
    params:
      - type: address
        value: "@@"
WRITE:
  deploy:
    wallet: alice
    instance: token
    params:
      - type: uint256
        reference: "$0 * 1e18"
  pay:
    wallet: alice
    value: "$0 gwei"
    to: "@bob"
  mint:
    wallet: alice
    instance: token
    method: mint
    params:
      - type: address
        value: "@carol"
      - type: uint256
        value: 100
  tip:
    wallet: "bob|carol"
    sticky: buyer
    value: 1 usdt
    to: "@alice"
  tip-again:
    wallet: "bob|carol"
    sticky: buyer
    value: 2 usdt
    to: "@alice"
TARGETS:
  release:
    - deploy
    - mint
    - holdings
  fast:
    - deploy &
    - mint &
  payday:
    - command: pay
      args: ["$0"]
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    client: Arc<MockClient>,
}

fn address(hex: &str) -> Address {
    Address::from_str(hex).unwrap()
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn word(value: U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

fn fast_policy() -> AwaitPolicy {
    AwaitPolicy {
        interval: Duration::from_millis(1),
        error_interval: Duration::from_millis(2),
        timeout: Duration::from_millis(200),
    }
}

async fn validate(yaml: &str, name: Option<&str>) -> (PlaybookResult<Validated>, Fixture) {
    validate_with(yaml, name, &[]).await
}

async fn validate_with(
    yaml: &str,
    name: Option<&str>,
    args: &[String],
) -> (PlaybookResult<Validated>, Fixture) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Token.json"), TOKEN_ARTIFACT).unwrap();
    let client = MockClient::new();
    let mut connector = MockConnector::new(client.clone());
    connector.dead.insert("http://dead:8545".into());
    let key_cache = MockKeyCache::default();
    let invocation = Invocation {
        name: name.map(str::to_string),
        args: args.to_vec(),
        node_group: "genesis".into(),
    };
    let ctx = Context::empty();
    let vctx = ValidationContext {
        invocation: &invocation,
        base_dir: dir.path(),
        key_cache: &key_cache,
        compiler: None,
        connector: &connector,
        ctx: &ctx,
    };
    let result = match PlaybookFile::from_yaml(yaml) {
        Ok(file) => Spec::validate(&file, &vctx).await,
        Err(e) => Err(e),
    };
    (result, Fixture { _dir: dir, client })
}

async fn executor(name: &str) -> (Executor, Fixture) {
    executor_for(PLAYBOOK, name).await
}

async fn executor_for(yaml: &str, name: &str) -> (Executor, Fixture) {
    let (validated, fixture) = validate(yaml, Some(name)).await;
    let validated = validated.unwrap();
    let client: Arc<dyn EthClient> = validated.client.unwrap();
    let executor = Executor::new(validated.spec, client, Arc::new(MockKeyCache::default()), Context::empty())
        .with_await_policy(fast_policy());
    (executor, fixture)
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn site_of<T>(result: PlaybookResult<T>) -> ValidationSite {
    let Err(error) = result else {
        panic!("expected a validation error");
    };
    error.downcast_ref::<ValidationSite>().cloned().expect("error has no site")
}

#[tokio::test]
async fn test_validation_skips_dead_nodes() {
    let (validated, _fixture) = validate(PLAYBOOK, Some("balances")).await;
    let validated = validated.unwrap();
    assert_eq!(validated.spec.node.as_deref(), Some("http://localhost:8545"));
    assert!(validated.client.is_some());
    assert_eq!(validated.spec.call_cmds["balances"].wallets, vec!["alice", "bob", "carol"]);
}

#[tokio::test]
async fn test_validate_only_needs_no_inventory() {
    let yaml = PLAYBOOK.replace("INVENTORY:\n  genesis:\n    - http://dead:8545\n    - http://localhost:8545\n", "");
    let (validated, _fixture) = validate(&yaml, None).await;
    let validated = validated.unwrap();
    assert!(validated.client.is_none());

    let (result, _fixture) = validate(&yaml, Some("balances")).await;
    assert_eq!(result.err().unwrap().current_context(), &PlaybookError::Validation);
}

#[tokio::test]
async fn test_unknown_name_is_rejected() {
    let (result, _fixture) = validate(PLAYBOOK, Some("nope")).await;
    assert!(format!("{:?}", result.err().unwrap()).contains("nope"));
}

#[tokio::test]
async fn test_names_are_unique_across_sections() {
    let yaml = PLAYBOOK.replace("  tip-again:", "  balances:");
    let (result, _fixture) = validate(&yaml, None).await;
    let site = site_of(result);
    assert_eq!(site.section, "WRITE");
    assert_eq!(site.name, "balances");

    let yaml = PLAYBOOK.replace("  payday:", "  deploy:");
    let (result, _fixture) = validate(&yaml, None).await;
    assert_eq!(site_of(result).section, "TARGETS");
}

#[tokio::test]
async fn test_validation_order() {
    // both wallets and contracts are broken, wallets are checked first
    let yaml = PLAYBOOK
        .replace("\"5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a\"", "\"zz\"")
        .replace("artifact: Token.json", "artifact: Missing.json");
    let (result, _fixture) = validate(&yaml, None).await;
    let site = site_of(result);
    assert_eq!(site.section, "WALLETS");
    assert_eq!(site.name, "carol");

    let yaml = PLAYBOOK.replace("artifact: Token.json", "artifact: Missing.json");
    let (result, _fixture) = validate(&yaml, None).await;
    assert_eq!(site_of(result).section, "CONTRACTS");
}

#[tokio::test]
async fn test_required_sections() {
    let (result, _fixture) = validate("CONFIG:\n  chainID: 1\n", None).await;
    assert!(format!("{:?}", result.err().unwrap()).contains("at least one of READ, WRITE or CALL"));

    let yaml = "CALL:\n  peers:\n    method: net_peerCount\n";
    let (result, _fixture) = validate(yaml, None).await;
    assert!(format!("{:?}", result.err().unwrap()).contains("WALLETS"));
}

#[tokio::test]
async fn test_write_wallet_selection() {
    let (validated, _fixture) = validate(PLAYBOOK, None).await;
    let spec = validated.unwrap().spec;
    assert_eq!(spec.write_cmds["tip"].wallet, spec.write_cmds["tip-again"].wallet);
    assert!(["bob", "carol"].contains(&spec.write_cmds["tip"].wallet.as_str()));

    let yaml = PLAYBOOK.replace("    wallet: \"bob|carol\"\n    sticky: buyer\n    value: 1 usdt", "    wallet: dave\n    sticky: buyer\n    value: 1 usdt");
    let (result, _fixture) = validate(&yaml, None).await;
    let error = result.err().unwrap();
    assert!(format!("{:?}", error).contains("no wallet matches"));

    // "buyer" is bound to bob or carol first, so a selector for alice alone conflicts
    let yaml = PLAYBOOK.replace("  tip-again:\n    wallet: \"bob|carol\"", "  tip-again:\n    wallet: alice");
    let (result, _fixture) = validate(&yaml, None).await;
    assert!(format!("{:?}", result.err().unwrap()).contains("ambiguous wallet"));
}

#[tokio::test]
async fn test_arg_counts() {
    let (validated, _fixture) = validate(PLAYBOOK, None).await;
    let spec = validated.unwrap().spec;
    assert_eq!(spec.arg_count("balances"), Some(0));
    assert_eq!(spec.arg_count("deploy"), Some(1));
    assert_eq!(spec.arg_count("pay"), Some(1));
    assert_eq!(spec.arg_count("release"), Some(1));
    assert_eq!(spec.arg_count("payday"), Some(1));
    assert_eq!(spec.arg_count("missing"), None);
    let entries = spec.entries();
    assert_eq!(entries.len(), 11);
    assert_eq!(entries[0].description.as_deref(), Some("Balance of every wallet"));
}

#[tokio::test]
async fn test_call_fans_out_in_wallet_order() {
    let (mut executor, fixture) = executor("balances").await;
    let results = executor.run_command("balances", &[]).await.unwrap();
    let wallets: Vec<_> = results.iter().map(|r| r.wallet.clone().unwrap()).collect();
    assert_eq!(wallets, vec!["alice", "bob", "carol"]);

    // the placeholder is the address of each wallet in turn
    let calls = fixture.client.rpc_calls();
    let balance_calls: Vec<_> = calls.iter().filter(|(method, _)| method == "eth_getBalance").collect();
    assert_eq!(balance_calls.len(), 3);
    for ((_, params), expected) in balance_calls.iter().zip([ALICE, BOB, CAROL]) {
        assert_eq!(params[0], JsonValue::String(expected.to_lowercase()));
        assert_eq!(params[1], JsonValue::String("latest".into()));
    }
    for (result, expected) in results.iter().zip([ALICE, BOB, CAROL]) {
        assert_eq!(result.result.as_ref().unwrap(), &JsonValue::String(expected.to_lowercase()));
        assert_eq!(result.address, Some(address(expected)));
    }
}

#[tokio::test]
async fn test_call_errors_stay_per_wallet() {
    let (mut executor, _fixture) = executor("broken").await;
    let results = executor.run_command("broken", &[]).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| !r.is_ok()));
}

#[tokio::test]
async fn test_read_requires_deployed_instance() {
    let (mut executor, _fixture) = executor("holdings").await;
    let results = executor.run_command("holdings", &[]).await.unwrap();
    assert_eq!(results.len(), 1);
    let error = results[0].result.as_ref().unwrap_err();
    assert!(format!("{:?}", error).contains("not deployed"));
}

#[tokio::test]
async fn test_deploy_then_read() {
    let (mut executor, fixture) = executor("deploy").await;
    let results = executor.run_command("deploy", &args(&["5"])).await.unwrap();
    let marker = results[0].result.as_ref().unwrap().as_str().unwrap().to_string();
    assert!(marker.starts_with(TX_MARKER));
    assert_eq!(marker, marker.to_lowercase());

    let sent = fixture.client.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, TxKind::Create);
    assert_eq!(&sent[0].input[..2], &[0x60, 0x80]);
    let supply = U256::from(5u64) * U256::from(10u64).pow(U256::from(18u64));
    assert_eq!(&sent[0].input[2..], &word(supply));

    let deployed = address(ALICE).create(0);
    let token = executor.spec.contracts.find_by_name("token").unwrap();
    assert_eq!(executor.spec.contracts.instance(token).address, Some(deployed));

    fixture.client.respond(selector("balanceOf(address)"), word(U256::from(7u64)).to_vec());
    let results = executor.run_command("holdings", &[]).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.result.as_ref().unwrap() == &JsonValue::String("7".into())));

    let reads: Vec<_> = fixture
        .client
        .calls()
        .into_iter()
        .filter(|c| c.input.input().map_or(false, |i| i.starts_with(&selector("balanceOf(address)"))))
        .collect();
    assert_eq!(reads.len(), 3);
    for (read, owner) in reads.iter().zip([ALICE, BOB, CAROL]) {
        assert_eq!(read.to, Some(TxKind::Call(deployed)));
        let input = read.input.input().unwrap();
        assert_eq!(&input[16..36], address(owner).as_slice());
    }
}

#[tokio::test]
async fn test_plain_transfer_uses_highest_gas_price() {
    let (mut executor, fixture) = executor("pay").await;
    fixture.client.set_gas_price(3_000_000_000);
    let results = executor.run_command("pay", &args(&["2"])).await.unwrap();
    assert!(results[0].is_ok());

    let sent = fixture.client.sent();
    assert_eq!(sent[0].to, TxKind::Call(address(BOB)));
    assert_eq!(sent[0].value, U256::from(2_000_000_000u64));
    assert_eq!(sent[0].gas_price, Some(3_000_000_000));
    assert_eq!(sent[0].gas_limit, 21_000);
    assert_eq!(sent[0].nonce, 0);
    assert_eq!(
        results[0].result.as_ref().unwrap(),
        &JsonValue::String(format!("{}{:#x}", TX_MARKER, sent[0].hash))
    );
}

#[tokio::test]
async fn test_missing_argument_fails_the_write() {
    let (mut executor, fixture) = executor("pay").await;
    let results = executor.run_command("pay", &[]).await.unwrap();
    let error = results[0].result.as_ref().unwrap_err();
    assert_eq!(error.current_context(), &PlaybookError::Resolution);
    assert!(fixture.client.sent().is_empty());
}

#[tokio::test]
async fn test_token_transfer_by_symbol() {
    let (mut executor, fixture) = executor("tip").await;
    let symbol = DynSolValue::Tuple(vec![DynSolValue::String("usdt".into())]).abi_encode_params();
    fixture.client.respond(selector("symbol()"), symbol);
    let results = executor.run_command("tip", &[]).await.unwrap();
    assert!(results[0].is_ok(), "{:?}", results[0].result);

    let usdt = executor.spec.contracts.find_by_name("usdt").unwrap();
    assert_eq!(executor.spec.contracts.instance(usdt).token_symbol.as_deref(), Some("USDT"));

    let sent = fixture.client.sent();
    assert_eq!(sent[0].to, TxKind::Call(address(USDT)));
    assert_eq!(sent[0].value, U256::ZERO);
    assert_eq!(&sent[0].input[..4], &selector("transfer(address,uint256)"));
    assert_eq!(&sent[0].input[16..36], address(ALICE).as_slice());
    assert_eq!(&sent[0].input[36..], &word(U256::from(1u64)));
}

#[tokio::test]
async fn test_unknown_token_symbol() {
    let (mut executor, fixture) = executor("tip").await;
    let results = executor.run_command("tip", &[]).await.unwrap();
    assert!(!results[0].is_ok());
    assert!(fixture.client.sent().is_empty());
}

#[tokio::test]
async fn test_target_halts_on_reverted_receipt() {
    let (mut executor, fixture) = executor("release").await;
    fixture.client.script_statuses(&[true, false]);
    let mut seen = vec![];
    let outcome = executor
        .run_target("release", &args(&["1"]), |step| seen.push(step.command.clone()))
        .await
        .unwrap();

    assert_eq!(outcome.results().count(), 2);
    assert_eq!(seen, vec!["deploy", "mint"]);
    let halt = outcome.halt.unwrap();
    assert_eq!(halt.step, 1);
    assert_eq!(
        halt.reason.current_context(),
        &PlaybookError::Confirmation(ConfirmationFailure::Reverted)
    );
    assert_eq!(fixture.client.sent().len(), 2);
    assert!(outcome.steps[0].receipt.is_some());
}

#[tokio::test]
async fn test_target_runs_all_steps() {
    let (mut executor, fixture) = executor("release").await;
    fixture.client.respond(selector("balanceOf(address)"), word(U256::from(100u64)).to_vec());
    let outcome = executor.run_target("release", &args(&["1"]), |_| {}).await.unwrap();
    assert!(outcome.halt.is_none());
    assert_eq!(outcome.results().count(), 1 + 1 + 3);
}

#[tokio::test]
async fn test_deferred_steps_skip_confirmation() {
    let (mut executor, fixture) = executor("fast").await;
    fixture.client.never_mine();
    let outcome = executor.run_target("fast", &args(&["1"]), |_| {}).await.unwrap();
    assert!(outcome.halt.is_none());
    assert_eq!(fixture.client.sent().len(), 2);
    assert_eq!(fixture.client.tx_queries(), 0);
}

#[tokio::test]
async fn test_confirmation_timeout_is_distinct() {
    let (mut executor, fixture) = executor("payday").await;
    fixture.client.never_mine();
    let outcome = executor.run_target("payday", &args(&["1"]), |_| {}).await.unwrap();
    let halt = outcome.halt.unwrap();
    assert_eq!(
        halt.reason.current_context(),
        &PlaybookError::Confirmation(ConfirmationFailure::TimedOut)
    );
    // the transaction itself was sent
    assert!(outcome.steps[0].results[0].is_ok());
}

#[tokio::test]
async fn test_confirmation_can_be_cancelled() {
    let (executor, fixture) = executor("payday").await;
    let (cancel, receiver) = watch::channel(false);
    let mut executor = executor.with_cancel(receiver);
    fixture.client.never_mine();
    cancel.send(true).unwrap();
    let outcome = executor.run_target("payday", &args(&["1"]), |_| {}).await.unwrap();
    assert_eq!(
        outcome.halt.unwrap().reason.current_context(),
        &PlaybookError::Confirmation(ConfirmationFailure::Cancelled)
    );
}

#[tokio::test]
async fn test_query_errors_are_tolerated() {
    let (mut executor, fixture) = executor("payday").await;
    fixture.client.fail_queries(3);
    let outcome = executor.run_target("payday", &args(&["1"]), |_| {}).await.unwrap();
    assert!(outcome.halt.is_none());
    assert!(fixture.client.tx_queries() >= 4);
}

#[tokio::test]
async fn test_step_arguments_come_from_the_target() {
    let (mut executor, fixture) = executor("payday").await;
    let outcome = executor.run_target("payday", &args(&["4"]), |_| {}).await.unwrap();
    assert!(outcome.halt.is_none());
    assert_eq!(fixture.client.sent()[0].value, U256::from(4_000_000_000u64));

    let outcome = executor.run_target("payday", &[], |_| {}).await.unwrap();
    let halt = outcome.halt.as_ref().unwrap();
    assert_eq!(halt.reason.current_context(), &PlaybookError::Resolution);
    assert_eq!(outcome.results().count(), 1);
}

#[tokio::test]
async fn test_validation_fails_without_live_node() {
    let yaml = PLAYBOOK.replace("    - http://localhost:8545\n", "");
    let (result, _fixture) = validate(&yaml, Some("balances")).await;
    let error = result.err().unwrap();
    assert_eq!(error.current_context(), &PlaybookError::Validation);
    let site = error.downcast_ref::<ValidationSite>().unwrap();
    assert_eq!(site.section, "INVENTORY");
    assert_eq!(site.name, "genesis");
}

#[tokio::test]
async fn test_arguments_of_one_command_do_not_break_another() {
    let yaml = PLAYBOOK.replace(
        "CALL:\n",
        "CALL:\n  balance-of:\n    method: eth_getBalance\n    params:\n      - type: address\n        reference: \"$0\"\n      - latest\n",
    );
    // deploy reads "$0 * 1e18", which "@bob" cannot satisfy
    let (validated, fixture) = validate_with(&yaml, Some("balance-of"), &args(&["@bob"])).await;
    let validated = validated.unwrap();
    assert!(validated.spec.write_cmds["deploy"].params[0].resolution.is_deferred());

    let client: Arc<dyn EthClient> = validated.client.unwrap();
    let mut executor =
        Executor::new(validated.spec, client, Arc::new(MockKeyCache::default()), Context::empty());
    let results = executor.run_command("balance-of", &args(&["@bob"])).await.unwrap();
    assert_eq!(results.len(), 3);
    for result in results.iter() {
        assert_eq!(result.result.as_ref().unwrap(), &JsonValue::String(BOB.to_lowercase()));
    }

    let results = executor.run_command("deploy", &args(&["@bob"])).await.unwrap();
    let error = results[0].result.as_ref().unwrap_err();
    assert_eq!(error.current_context(), &PlaybookError::Resolution);
    assert!(fixture.client.sent().is_empty());
}

#[tokio::test]
async fn test_value_reads_balance_of_another_wallet() {
    let yaml = PLAYBOOK.replace(
        "    value: \"$0 gwei\"\n    to: \"@bob\"",
        "    value: \"@bob.balance / 2\"\n    to: \"@carol\"",
    );
    let (mut executor, fixture) = executor_for(&yaml, "pay").await;
    fixture.client.set_balance(address(BOB), U256::from(10_000u64));
    let results = executor.run_command("pay", &[]).await.unwrap();
    assert!(results[0].is_ok(), "{:?}", results[0].result);

    let sent = fixture.client.sent();
    assert_eq!(sent[0].to, TxKind::Call(address(CAROL)));
    assert_eq!(sent[0].value, U256::from(5_000u64));
    assert_eq!(executor.spec.wallets.get("bob").unwrap().balance, Some(U256::from(10_000u64)));
    assert_eq!(executor.spec.wallets.get("alice").unwrap().balance, Some(U256::ZERO));
}

#[tokio::test]
async fn test_receipt_address_replaces_predicted_one() {
    let (mut executor, fixture) = executor("release").await;
    let deployed = Address::repeat_byte(0x42);
    fixture.client.deploy_at(deployed);
    fixture.client.respond(selector("balanceOf(address)"), word(U256::from(1u64)).to_vec());
    let outcome = executor.run_target("release", &args(&["1"]), |_| {}).await.unwrap();
    assert!(outcome.halt.is_none());

    let token = executor.spec.contracts.find_by_name("token").unwrap();
    assert_eq!(executor.spec.contracts.instance(token).address, Some(deployed));
    // mint runs after deploy is confirmed
    assert_eq!(fixture.client.sent()[1].to, TxKind::Call(deployed));
}

#[tokio::test(start_paused = true)]
async fn test_polling_backs_off_after_query_errors() {
    let client = MockClient::new();
    let hash = B256::repeat_byte(0x11);
    client.mine(hash, true);
    client.fail_queries(2);
    client.stay_pending(1);
    let policy = AwaitPolicy {
        interval: Duration::from_secs(1),
        error_interval: Duration::from_secs(10),
        timeout: Duration::from_secs(60),
    };

    let receipt = await_confirmation(&*client, hash, &policy, None, &Context::empty())
        .await
        .unwrap();
    assert!(receipt.success);
    let times = client.query_times();
    let gaps: Vec<Duration> = times.windows(2).map(|pair| pair[1] - pair[0]).collect();
    // two failed queries, one pending answer, then the receipt
    assert_eq!(
        gaps,
        vec![Duration::from_secs(10), Duration::from_secs(10), Duration::from_secs(1)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_backoff_never_overshoots_the_deadline() {
    let client = MockClient::new();
    let hash = B256::repeat_byte(0x22);
    client.mine(hash, true);
    client.fail_queries(usize::MAX);
    let policy = AwaitPolicy {
        interval: Duration::from_secs(1),
        error_interval: Duration::from_secs(10),
        timeout: Duration::from_secs(25),
    };

    let start = tokio::time::Instant::now();
    let error = await_confirmation(&*client, hash, &policy, None, &Context::empty())
        .await
        .unwrap_err();
    assert_eq!(error.current_context(), &PlaybookError::Confirmation(ConfirmationFailure::TimedOut));
    assert_eq!(start.elapsed(), Duration::from_secs(25));
    assert_eq!(client.tx_queries(), 3);
}
