use clap::{Arg, ArgAction, Command};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use tongbu::config::Config;
use tongbu::logging::*;
use tongbu::manager::TaskManager;
use tongbu::store::Store;
use tongbu::transport::RemoteOptions;
use tongbu::types::{Credential, EndpointDescriptor, EolPolicy, HostKeyPolicy, RemoteDescriptor, SyncMode, TaskDef};

mod serve;

fn open_store(config: &Config) -> Result<Arc<Store>, Box<dyn Error>> {
	std::fs::create_dir_all(&config.state_dir)?;
	let store = Store::open(&config.state_dir.join("state.redb"))?;
	Ok(Arc::new(store))
}

fn endpoint_from_matches(
	path: &str,
	host: Option<&String>,
	port: Option<u16>,
	user: Option<&String>,
	key: Option<&String>,
	password: Option<&String>,
) -> EndpointDescriptor {
	let remote = host.map(|h| RemoteDescriptor {
		host: h.clone(),
		port: port.unwrap_or(22),
		username: user.cloned().unwrap_or_default(),
		credential: match key {
			Some(k) => Credential::KeyFile(PathBuf::from(k)),
			None => Credential::Password(password.cloned().unwrap_or_default()),
		},
	});
	EndpointDescriptor { path: PathBuf::from(path), remote, trash_dir: None, backup_dir: None }
}

fn next_task_id(store: &Store) -> Result<u64, Box<dyn Error>> {
	Ok(store.all_tasks()?.iter().map(|t| t.id).max().unwrap_or(0) + 1)
}

fn endpoint_arg(side: &str) -> Vec<Arg> {
	vec![
		Arg::new(format!("{}-path", side)).long(format!("{}", side)).value_name("PATH").required(true),
		Arg::new(format!("{}-host", side)).long(format!("{}-host", side)).value_name("HOST"),
		Arg::new(format!("{}-port", side)).long(format!("{}-port", side)).value_name("PORT"),
		Arg::new(format!("{}-user", side)).long(format!("{}-user", side)).value_name("USER"),
		Arg::new(format!("{}-key", side)).long(format!("{}-key", side)).value_name("KEYFILE"),
		Arg::new(format!("{}-password", side)).long(format!("{}-password", side)).value_name("PASSWORD"),
	]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("tongbu")
		.version("0.1.0")
		.author("Szilard Hajba <szilu@symbion.hu>")
		.about("Continuous one-way and two-way directory synchronization over local and SSH endpoints")
		.subcommand_required(true)
		.arg(Arg::new("config").short('c').long("config").value_name("PATH").help("Config file path"))
		.subcommand(
			Command::new("serve-remote")
				.about("Remote transport protocol server (spawned internally over ssh)")
				.arg(Arg::new("path").required(true)),
		)
		.subcommand(
			Command::new("notify-stream")
				.about("Stream kernel filesystem notifications for a directory (spawned internally over ssh)")
				.arg(Arg::new("path").required(true)),
		)
		.subcommand(Command::new("run").about("Load the task registry and run every enabled auto-start task"))
		.subcommand(
			Command::new("task")
				.about("Manage sync tasks")
				.subcommand_required(true)
				.subcommand(
					Command::new("add")
						.about("Define a new sync task")
						.arg(Arg::new("name").long("name").required(true))
						.arg(
							Arg::new("mode")
								.long("mode")
								.value_parser(["one-way", "two-way"])
								.default_value("two-way"),
						)
						.args(endpoint_arg("a"))
						.args(endpoint_arg("b"))
						.arg(Arg::new("exclude").long("exclude").action(ArgAction::Append))
						.arg(Arg::new("ext").long("ext").action(ArgAction::Append))
						.arg(Arg::new("eol").long("eol").value_parser(["lf", "crlf", "keep"]).default_value("keep"))
						.arg(Arg::new("poll-interval").long("poll-interval").default_value("5.0"))
						.arg(Arg::new("trash-retention-days").long("trash-retention-days").default_value("7"))
						.arg(Arg::new("backup-retention-days").long("backup-retention-days").default_value("7"))
						.arg(Arg::new("disabled").long("disabled").action(ArgAction::SetTrue))
						.arg(Arg::new("no-auto-start").long("no-auto-start").action(ArgAction::SetTrue))
						.arg(Arg::new("quiet").long("quiet").action(ArgAction::SetTrue).help("Suppress sync_logs rows for successful events")),
				)
				.subcommand(Command::new("list").about("List every defined task"))
				.subcommand(Command::new("start").arg(Arg::new("id").required(true)))
				.subcommand(Command::new("stop").arg(Arg::new("id").required(true)))
				.subcommand(Command::new("restart").arg(Arg::new("id").required(true)))
				.subcommand(Command::new("sync").about("Force a full sync pass").arg(Arg::new("id").required(true)))
				.subcommand(Command::new("status").arg(Arg::new("id").required(true))),
		)
		.get_matches();

	// These two subcommands are spawned as children over ssh with their
	// stdout carrying the framed protocol; their logs must propagate through
	// that same stream rather than land on a separate stderr (§10.2).
	if matches.subcommand_matches("serve-remote").is_some() || matches.subcommand_matches("notify-stream").is_some() {
		init_protocol_propagation();
	} else {
		init_tracing();
	}

	if let Some(m) = matches.subcommand_matches("serve-remote") {
		let path = PathBuf::from(m.get_one::<String>("path").expect("required"));
		return serve::serve_remote(path).await.map_err(|e| e.into());
	}
	if let Some(m) = matches.subcommand_matches("notify-stream") {
		let path = PathBuf::from(m.get_one::<String>("path").expect("required"));
		return serve::notify_stream(path).await.map_err(|e| e.into());
	}

	let config_path = Config::resolve_path(matches.get_one::<String>("config").map(PathBuf::from));
	let config = if config_path.exists() { Config::load(&config_path)? } else { Config::default() };
	if matches!(config.host_key_policy, HostKeyPolicy::Auto) {
		warn!("host-key policy is 'auto': unknown remote hosts will be accepted without verification");
	}
	let remote = RemoteOptions {
		bin: config.remote_bin.clone(),
		host_key_policy: config.host_key_policy,
		known_hosts_path: config.ssh_known_hosts_path.clone(),
	};

	if matches.subcommand_matches("run").is_some() {
		let store = open_store(&config)?;
		let manager = Arc::new(TaskManager::new(store, remote.clone(), config.batch_max_parallel));
		manager.auto_start().await?;
		info!("tongbu running, press ctrl-c to stop");
		tokio::signal::ctrl_c().await?;
		manager.stop_all().await;
		return Ok(());
	}

	if let Some(task_matches) = matches.subcommand_matches("task") {
		let store = open_store(&config)?;

		if let Some(m) = task_matches.subcommand_matches("add") {
			let mode = match m.get_one::<String>("mode").map(String::as_str) {
				Some("one-way") => SyncMode::OneWay,
				_ => SyncMode::TwoWay,
			};
			let a = endpoint_from_matches(
				m.get_one::<String>("a-path").expect("required"),
				m.get_one::<String>("a-host"),
				m.get_one::<String>("a-port").and_then(|p| p.parse().ok()),
				m.get_one::<String>("a-user"),
				m.get_one::<String>("a-key"),
				m.get_one::<String>("a-password"),
			);
			let b = endpoint_from_matches(
				m.get_one::<String>("b-path").expect("required"),
				m.get_one::<String>("b-host"),
				m.get_one::<String>("b-port").and_then(|p| p.parse().ok()),
				m.get_one::<String>("b-user"),
				m.get_one::<String>("b-key"),
				m.get_one::<String>("b-password"),
			);
			let eol_policy = match m.get_one::<String>("eol").map(String::as_str) {
				Some("lf") => EolPolicy::Lf,
				Some("crlf") => EolPolicy::Crlf,
				_ => EolPolicy::Keep,
			};

			let def = TaskDef {
				id: next_task_id(&store)?,
				name: m.get_one::<String>("name").expect("required").clone(),
				mode,
				a,
				b,
				exclude_patterns: m.get_many::<String>("exclude").map(|v| v.cloned().collect()).unwrap_or_default(),
				allowed_extensions: m.get_many::<String>("ext").map(|v| v.cloned().collect()).unwrap_or_default(),
				eol_policy,
				enabled: !m.get_flag("disabled"),
				auto_start: !m.get_flag("no-auto-start"),
				poll_interval_secs: m.get_one::<String>("poll-interval").and_then(|s| s.parse().ok()).unwrap_or(5.0),
				trash_retention_days: m
					.get_one::<String>("trash-retention-days")
					.and_then(|s| s.parse().ok())
					.unwrap_or(7),
				backup_retention_days: m
					.get_one::<String>("backup-retention-days")
					.and_then(|s| s.parse().ok())
					.unwrap_or(7),
				log_successful_events: !m.get_flag("quiet"),
			};
			let manager = TaskManager::new(store, remote.clone(), config.batch_max_parallel);
			manager.create_task(&def)?;
			println!("task {} created: {}", def.id, def.name);
			return Ok(());
		}

		if task_matches.subcommand_matches("list").is_some() {
			for task in store.all_tasks()? {
				println!(
					"{:>4}  {:<20}  {:?}  {} -> {}  enabled={} auto_start={}",
					task.id,
					task.name,
					task.mode,
					task.a.path.display(),
					task.b.path.display(),
					task.enabled,
					task.auto_start
				);
			}
			return Ok(());
		}

		let manager = Arc::new(TaskManager::new(store, remote.clone(), config.batch_max_parallel));

		if let Some(m) = task_matches.subcommand_matches("start") {
			let id: u64 = m.get_one::<String>("id").expect("required").parse()?;
			manager.start_task(id).await?;
			// Keep the process alive while this single task runs, since nothing
			// else registered it with a long-lived manager.
			tokio::signal::ctrl_c().await?;
			manager.stop_task(id).await?;
			return Ok(());
		}
		if let Some(m) = task_matches.subcommand_matches("stop") {
			let id: u64 = m.get_one::<String>("id").expect("required").parse()?;
			manager.stop_task(id).await?;
			return Ok(());
		}
		if let Some(m) = task_matches.subcommand_matches("restart") {
			let id: u64 = m.get_one::<String>("id").expect("required").parse()?;
			manager.restart_task(id).await?;
			return Ok(());
		}
		if let Some(m) = task_matches.subcommand_matches("sync") {
			let id: u64 = m.get_one::<String>("id").expect("required").parse()?;
			manager.full_sync(id).await?;
			println!("task {} synced", id);
			return Ok(());
		}
		if let Some(m) = task_matches.subcommand_matches("status") {
			let id: u64 = m.get_one::<String>("id").expect("required").parse()?;
			let status = manager.status(id).await?;
			println!(
				"task {} ({}): running={} runner_status={:?}",
				status.task_id, status.name, status.running, status.runner_status
			);
			return Ok(());
		}
	}

	Ok(())
}

// vim: ts=4
