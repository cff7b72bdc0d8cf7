//! qctl - Quorum node registry command line interface

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use qube::{
    AddressResolver, Consensus, DeleteReport, ExternalNodeEntry, ExternalNodePatch,
    FileRegistryStore, KubeController, Lifecycle, Listing, NetworkConfig, NewNode, NodeEntry,
    NodePatch, Projection, QubeConfig, QubeError, RegistryStore, StepOutcome, TransactionManager,
    config::{DEFAULT_KUBECTL, DEFAULT_NAMESPACE},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_NODE_IP: &str = "<K8s_NODE_IP>";

#[derive(Parser, Debug)]
#[command(name = "qctl", author, version, about = "Manage the nodes of a Quorum network on Kubernetes", long_about = None)]
struct Cli {
    /// Registry config file (qubernetes.yaml)
    #[arg(short, long, env = "QUBE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory holding generated keys and K8s resources
    #[arg(long, env = "QUBE_K8S_DIR", global = true)]
    k8sdir: Option<PathBuf>,

    /// Kubernetes namespace the network runs in
    #[arg(long, env = "QUBE_NAMESPACE", default_value = DEFAULT_NAMESPACE, global = true)]
    namespace: String,

    /// kubectl binary used by `connect`
    #[arg(long, env = "QUBE_KUBECTL", default_value = DEFAULT_KUBECTL, global = true)]
    kubectl: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a node or external node to the registry
    Add {
        #[command(subcommand)]
        target: AddTarget,
    },
    /// Update fields of an existing entry
    Update {
        #[command(subcommand)]
        target: UpdateTarget,
    },
    /// Delete an entry and the cluster resources it owns
    Delete {
        #[command(subcommand)]
        target: DeleteTarget,
    },
    /// Stop a node by removing its deployment
    Stop {
        #[command(subcommand)]
        target: StopTarget,
    },
    /// List registry entries
    Ls {
        #[command(subcommand)]
        target: LsTarget,
    },
    /// Open a shell in a running pod
    Connect {
        /// Pod name prefix, e.g. quorum-node1
        pod_prefix: String,
        /// Container to attach to (default: quorum)
        container: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum AddTarget {
    /// Add a member node
    Node(AddNodeArgs),
    /// Add a node from another cluster
    ExternalNode(AddExternalArgs),
}

#[derive(Args, Debug)]
struct AddNodeArgs {
    /// Unique node name
    name: String,
    /// Key directory under <k8sdir>/config (default: key-<name>)
    #[arg(long)]
    keydir: Option<String>,
    /// raft | istanbul (default: genesis consensus)
    #[arg(long)]
    consensus: Option<Consensus>,
    /// Quorum version (default: genesis Quorum_Version)
    #[arg(long)]
    qversion: Option<String>,
    /// tessera | constellation (default: the first node's)
    #[arg(long)]
    tm: Option<TransactionManager>,
    /// Transaction manager version (default: the first node's)
    #[arg(long)]
    tmversion: Option<String>,
    /// Full quorum docker image, e.g. quorumengineering/quorum:2.6.0
    #[arg(long)]
    qimagefull: Option<String>,
    /// Full transaction manager docker image
    #[arg(long)]
    tmimagefull: Option<String>,
    /// Extra geth startup parameters
    #[arg(long)]
    gethparams: Option<String>,
}

#[derive(Args, Debug)]
struct AddExternalArgs {
    /// Unique external node name
    name: String,
    /// Externally reachable enode URL
    #[arg(long)]
    enode_url: String,
    /// Externally reachable transaction manager URL
    #[arg(long)]
    tm_url: String,
    /// Node key account address (istanbul only)
    #[arg(long)]
    node_key_address: Option<String>,
}

#[derive(Subcommand, Debug)]
enum UpdateTarget {
    /// Update a member node
    Node(UpdateNodeArgs),
    /// Update an external node
    ExternalNode(UpdateExternalArgs),
}

#[derive(Args, Debug)]
struct UpdateNodeArgs {
    name: String,
    #[arg(long)]
    consensus: Option<Consensus>,
    #[arg(long)]
    qversion: Option<String>,
    #[arg(long)]
    tm: Option<TransactionManager>,
    #[arg(long)]
    tmversion: Option<String>,
    #[arg(long)]
    qimagefull: Option<String>,
    #[arg(long)]
    tmimagefull: Option<String>,
    #[arg(long)]
    gethparams: Option<String>,
}

#[derive(Args, Debug)]
struct UpdateExternalArgs {
    name: String,
    #[arg(long)]
    enode_url: Option<String>,
    #[arg(long)]
    tm_url: Option<String>,
    #[arg(long)]
    node_key_address: Option<String>,
}

#[derive(Subcommand, Debug)]
enum DeleteTarget {
    /// Delete a member node
    Node {
        name: String,
        /// Also remove the node's key files and key directory
        #[arg(long)]
        hard: bool,
    },
    /// Delete an external node
    ExternalNode { name: String },
}

#[derive(Subcommand, Debug)]
enum StopTarget {
    /// Stop a member node, keeping its data and keys
    Node { name: String },
}

#[derive(Subcommand, Debug)]
enum LsTarget {
    /// List member nodes
    Node(LsNodeArgs),
    /// List external nodes
    ExternalNode(LsExternalArgs),
}

#[derive(Args, Debug)]
struct LsNodeArgs {
    /// Only show this node
    name: Option<String>,
    /// Display every field
    #[arg(short, long)]
    all: bool,
    #[arg(long = "name")]
    show_name: bool,
    #[arg(long)]
    consensus: bool,
    #[arg(long)]
    quorumversion: bool,
    #[arg(long)]
    tmname: bool,
    #[arg(long)]
    tmversion: bool,
    #[arg(long)]
    keydir: bool,
    #[arg(long)]
    enodeurl: bool,
    #[arg(long)]
    qimagefull: bool,
    #[arg(long)]
    tmimagefull: bool,
    #[arg(long)]
    gethparams: bool,
    /// Minimal output for scripts
    #[arg(short, long)]
    bare: bool,
    /// Output as JSON
    #[arg(short, long)]
    json: bool,
    /// Show the entry another cluster needs to add this node as an external node
    #[arg(long)]
    asexternal: bool,
    /// IP of a K8s node, e.g. $(minikube ip) (used with --asexternal)
    #[arg(long, default_value = DEFAULT_NODE_IP)]
    node_ip: String,
}

#[derive(Args, Debug)]
struct LsExternalArgs {
    /// Only show this external node
    name: Option<String>,
    #[arg(short, long)]
    bare: bool,
    #[arg(short, long)]
    json: bool,
}

// ==================== Context ====================

/// Everything a registry command needs, built once per invocation.
struct CommandContext {
    config: QubeConfig,
    store: FileRegistryStore,
    controller: KubeController,
}

impl CommandContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = QubeConfig::new(
            cli.config.as_deref(),
            cli.k8sdir.as_deref(),
            Some(cli.namespace.as_str()),
            Some(cli.kubectl.as_str()),
        )?;
        Ok(Self {
            store: config.store(),
            controller: config.controller()?,
            config,
        })
    }

    fn load(&self) -> Result<NetworkConfig> {
        Ok(self.store.load()?)
    }

    fn save(&self, registry: &NetworkConfig) -> Result<()> {
        self.store.save(registry).with_context(|| {
            format!(
                "Failed to write registry {}",
                self.config.registry_path.display()
            )
        })
    }

    fn lifecycle(&self) -> Lifecycle<'_, KubeController> {
        let lifecycle = Lifecycle::new(&self.controller);
        match &self.config.k8s_dir {
            Some(dir) => lifecycle.with_k8s_dir(dir),
            None => lifecycle,
        }
    }

    fn resolver(&self) -> AddressResolver<'_, KubeController> {
        AddressResolver::new(&self.controller)
    }

    fn print_header(&self) {
        println!();
        println!("  {}", "Using config file:".green());
        println!("  {}", self.config.registry_path.display());
        if let Some(dir) = &self.config.k8s_dir {
            println!("  {}", "K8sdir set to:".green());
            println!("  {}", dir.display());
        }
        println!("{}", "*".repeat(89));
        println!();
    }
}

fn print_next_steps(steps: &[String]) {
    if steps.is_empty() {
        return;
    }
    println!();
    for step in steps {
        println!("  {}", step.green());
    }
}

fn regenerate_hint() -> Vec<String> {
    vec![
        "To apply the change, regenerate and redeploy the network:".to_string(),
        "  qctl generate network --update".to_string(),
        "  qctl deploy network".to_string(),
    ]
}

// ==================== Add / Update ====================

fn cmd_add_node(ctx: &CommandContext, args: AddNodeArgs) -> Result<()> {
    ctx.print_header();
    let mut registry = ctx.load()?;
    println!("config currently has {} nodes", registry.nodes.len());

    let node = registry
        .add_node(NewNode {
            identity: args.name,
            key_dir: args.keydir,
            consensus: args.consensus,
            quorum_version: args.qversion,
            tm_name: args.tm,
            tm_version: args.tmversion,
            quorum_image: args.qimagefull,
            tm_image: args.tmimagefull,
            startup_params: args.gethparams,
        })?
        .clone();
    ctx.save(&registry)?;

    println!("{}", format!("  Added node [{}]", node.identity).green().bold());
    render_node(ctx, &node, &Projection::all(), false);
    print_next_steps(&regenerate_hint());
    Ok(())
}

fn cmd_add_external(ctx: &CommandContext, args: AddExternalArgs) -> Result<()> {
    ctx.print_header();
    let mut registry = ctx.load()?;
    let entry = registry
        .add_external_node(ExternalNodeEntry {
            identity: args.name,
            enode_url: args.enode_url,
            tm_url: args.tm_url,
            node_key_address: args.node_key_address,
        })?
        .clone();
    ctx.save(&registry)?;

    println!(
        "{}",
        format!("  Added external node [{}]", entry.identity)
            .green()
            .bold()
    );
    render_external(&entry);
    print_next_steps(&regenerate_hint());
    Ok(())
}

fn cmd_update_node(ctx: &CommandContext, args: UpdateNodeArgs) -> Result<()> {
    ctx.print_header();
    let mut registry = ctx.load()?;
    let patch = NodePatch {
        consensus: args.consensus,
        quorum_version: args.qversion,
        tm_name: args.tm,
        tm_version: args.tmversion,
        quorum_image: args.qimagefull,
        tm_image: args.tmimagefull,
        startup_params: args.gethparams,
    };
    if patch.is_empty() {
        println!("{}", "  Nothing to update.".yellow());
    }
    let node = registry.update_node(&args.name, patch)?.clone();
    ctx.save(&registry)?;

    println!("{}", format!("  Updated node [{}]", node.identity).green().bold());
    render_node(ctx, &node, &Projection::all(), false);
    print_next_steps(&regenerate_hint());
    Ok(())
}

fn cmd_update_external(ctx: &CommandContext, args: UpdateExternalArgs) -> Result<()> {
    ctx.print_header();
    let mut registry = ctx.load()?;
    let entry = registry
        .update_external_node(
            &args.name,
            ExternalNodePatch {
                enode_url: args.enode_url,
                tm_url: args.tm_url,
                node_key_address: args.node_key_address,
            },
        )?
        .clone();
    ctx.save(&registry)?;

    println!(
        "{}",
        format!("  Updated external node [{}]", entry.identity)
            .green()
            .bold()
    );
    render_external(&entry);
    print_next_steps(&regenerate_hint());
    Ok(())
}

// ==================== Stop / Delete ====================

fn cmd_stop_node(ctx: &CommandContext, name: &str) -> Result<()> {
    ctx.print_header();
    let registry = ctx.load()?;
    let report = ctx.lifecycle().stop(&registry, name)?;

    match &report.outcome {
        StepOutcome::Absent => println!(
            "{}",
            format!("  Node [{}] has no running deployment.", report.identity).yellow()
        ),
        _ => println!(
            "{}",
            format!("  Stopped node [{}]", report.identity).green().bold()
        ),
    }
    print_next_steps(&report.next_steps);
    Ok(())
}

fn cmd_delete_node(ctx: &CommandContext, name: &str, hard: bool) -> Result<()> {
    ctx.print_header();
    let mut registry = ctx.load()?;
    println!("config currently has {} nodes", registry.nodes.len());
    if hard {
        println!("{}", "  Hard delete: removing key files and directory".red());
    }

    let report = ctx.lifecycle().delete(&mut registry, name, hard)?;
    ctx.save(&registry)?;

    render_delete_report(&report);
    Ok(())
}

fn render_delete_report(report: &DeleteReport) {
    for (step, outcome) in &report.steps {
        let status = match outcome {
            StepOutcome::Done => "done".green(),
            StepOutcome::Absent => "not found".yellow(),
            StepOutcome::Failed(reason) => format!("failed: {}", reason).red(),
            StepOutcome::Skipped(reason) => format!("skipped: {}", reason).normal(),
        };
        println!("  {:<32} {}", step.to_string(), status);
    }
    println!();
    println!(
        "{}",
        format!("  Deleted node [{}]", report.removed.identity)
            .green()
            .bold()
    );
    if report.has_failures() {
        println!(
            "{}",
            "  Some cluster resources could not be removed, check the log above.".yellow()
        );
    }
    print_next_steps(&report.next_steps);
}

fn cmd_delete_external(ctx: &CommandContext, name: &str) -> Result<()> {
    ctx.print_header();
    let mut registry = ctx.load()?;
    let report = ctx.lifecycle().delete_external(&mut registry, name)?;
    ctx.save(&registry)?;

    println!(
        "{}",
        format!("  Deleted external node [{}]", report.removed.identity)
            .green()
            .bold()
    );
    print_next_steps(&report.next_steps);
    Ok(())
}

// ==================== List ====================

fn projection_from(args: &LsNodeArgs, has_k8s_dir: bool) -> Projection {
    let mut projection = if args.all {
        Projection {
            enode_url: has_k8s_dir,
            ..Projection::all()
        }
    } else {
        Projection {
            name: args.show_name,
            key_dir: args.keydir,
            consensus: args.consensus,
            quorum_version: args.quorumversion,
            tm_name: args.tmname,
            tm_version: args.tmversion,
            enode_url: args.enodeurl,
            quorum_image: args.qimagefull,
            tm_image: args.tmimagefull,
            startup_params: args.gethparams,
        }
    };
    if projection == Projection::default() {
        projection.name = true;
    }
    projection
}

fn report_miss<T>(listing: &Listing<'_, T>, kind: qube::EntryKind) -> Result<()> {
    if let Some(filter) = &listing.filter
        && listing.is_miss()
    {
        return Err(QubeError::not_found(kind, filter, listing.known.clone()).into());
    }
    Ok(())
}

fn cmd_ls_node(ctx: &CommandContext, args: LsNodeArgs) -> Result<()> {
    let quiet = args.bare || args.json;
    if !quiet {
        ctx.print_header();
    }
    let registry = ctx.load()?;
    let projection = projection_from(&args, ctx.config.k8s_dir.is_some());
    let listing = registry.list(args.name.as_deref(), projection);
    report_miss(&listing, qube::EntryKind::Node)?;

    if args.asexternal {
        let resolver = ctx.resolver();
        let entries = listing
            .matches
            .iter()
            .map(|node| resolver.resolve_external_descriptor(node, &args.node_ip))
            .collect::<Result<Vec<_>, _>>()?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        } else {
            print!("{}", serde_yaml::to_string(&entries)?);
        }
        return Ok(());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing.matches)?);
        return Ok(());
    }
    if !args.bare {
        println!("config currently has {} nodes", registry.nodes.len());
    }
    for node in &listing.matches {
        render_node(ctx, node, &listing.projection, args.bare);
    }
    Ok(())
}

fn cmd_ls_external(ctx: &CommandContext, args: LsExternalArgs) -> Result<()> {
    if !(args.bare || args.json) {
        ctx.print_header();
    }
    let registry = ctx.load()?;
    let listing = registry.list_external(args.name.as_deref(), Projection::all());
    report_miss(&listing, qube::EntryKind::ExternalNode)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing.matches)?);
    } else if args.bare {
        for entry in &listing.matches {
            println!("{}", entry.identity);
        }
    } else {
        for entry in &listing.matches {
            render_external(entry);
        }
    }
    Ok(())
}

fn render_node(ctx: &CommandContext, node: &NodeEntry, projection: &Projection, bare: bool) {
    let enode_url = projection.enode_url.then(|| {
        ctx.resolver()
            .resolve_enode_url(&node.identity)
            .unwrap_or_else(|e| {
                tracing::warn!(node = %node.identity, error = %e, "Unable to resolve enode url");
                String::new()
            })
    });
    let optional = |v: &Option<String>| v.clone().unwrap_or_default();

    let fields: [(bool, &str, String); 10] = [
        (projection.name, "unique name", node.identity.clone()),
        (projection.key_dir, "keydir", node.key_dir.clone()),
        (projection.consensus, "consensus", node.consensus.to_string()),
        (projection.quorum_version, "quorumVersion", node.quorum_version.clone()),
        (
            projection.tm_name,
            "txManager",
            node.tm_name.map(|tm| tm.to_string()).unwrap_or_default(),
        ),
        (projection.tm_version, "tmVersion", optional(&node.tm_version)),
        (projection.quorum_image, "quorumImage", optional(&node.quorum_image)),
        (projection.tm_image, "tmImage", optional(&node.tm_image)),
        (projection.enode_url, "enodeUrl", enode_url.unwrap_or_default()),
        (projection.startup_params, "geth params", optional(&node.startup_params)),
    ];

    if bare {
        for (_, _, value) in fields.iter().filter(|(on, _, _)| *on) {
            println!("{}", value);
        }
        return;
    }

    println!();
    println!("{}", format!("     [{}]", node.identity).green().bold());
    for (_, label, value) in fields
        .iter()
        .skip(1)
        .filter(|(on, _, value)| *on && !value.is_empty())
    {
        println!(
            "{}",
            format!("     [{}] {}: [{}]", node.identity, label, value).green()
        );
    }
}

fn render_external(entry: &ExternalNodeEntry) {
    println!();
    println!("{}", format!("     [{}]", entry.identity).green().bold());
    println!(
        "{}",
        format!("     [{}] enodeUrl: [{}]", entry.identity, entry.enode_url).green()
    );
    println!(
        "{}",
        format!("     [{}] tmUrl: [{}]", entry.identity, entry.tm_url).green()
    );
    if let Some(address) = &entry.node_key_address {
        println!(
            "{}",
            format!("     [{}] nodeKeyAddress: [{}]", entry.identity, address).green()
        );
    }
}

// ==================== Connect ====================

fn cmd_connect(cli: &Cli, pod_prefix: &str, container: Option<&str>) -> Result<()> {
    let controller =
        KubeController::new(cli.namespace.as_str())?.with_kubectl(cli.kubectl.as_str());
    Lifecycle::new(&controller)
        .connect(pod_prefix, container)
        .with_context(|| format!("Failed to connect to pod [{}]", pod_prefix))
}

// ==================== Main ====================

fn run(cli: Cli) -> Result<()> {
    if let Commands::Connect {
        pod_prefix,
        container,
    } = &cli.command
    {
        return cmd_connect(&cli, pod_prefix, container.as_deref());
    }

    let ctx = CommandContext::new(&cli)?;
    match cli.command {
        Commands::Add { target } => match target {
            AddTarget::Node(args) => cmd_add_node(&ctx, args),
            AddTarget::ExternalNode(args) => cmd_add_external(&ctx, args),
        },
        Commands::Update { target } => match target {
            UpdateTarget::Node(args) => cmd_update_node(&ctx, args),
            UpdateTarget::ExternalNode(args) => cmd_update_external(&ctx, args),
        },
        Commands::Delete { target } => match target {
            DeleteTarget::Node { name, hard } => cmd_delete_node(&ctx, &name, hard),
            DeleteTarget::ExternalNode { name } => cmd_delete_external(&ctx, &name),
        },
        Commands::Stop { target } => match target {
            StopTarget::Node { name } => cmd_stop_node(&ctx, &name),
        },
        Commands::Ls { target } => match target {
            LsTarget::Node(args) => cmd_ls_node(&ctx, args),
            LsTarget::ExternalNode(args) => cmd_ls_external(&ctx, args),
        },
        Commands::Connect { .. } => Ok(()),
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<QubeError>()
        .map(QubeError::exit_code)
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qube=info,qctl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::from(exit_code(&e))
        }
    }
}
