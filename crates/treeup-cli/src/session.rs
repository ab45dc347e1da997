//! The orchestrator: pick the action (clone, pull, repair, use a saved
//! pack), drive discovery and the fetch, feed the pack through decode and
//! delta resolution, materialize the tree, and finish up.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use treeup_hash::ObjectId;
use treeup_pack::{decode_pack, delta::resolve_deltas, MappedPack, ObjectStore};
use treeup_protocol::refs::RefChoice;
use treeup_protocol::{commands, refs, sideband};
use treeup_transport::{HttpEndpoint, TransferProgress};
use treeup_worktree::{
    load_manifest, scan_local, write_revision, IgnoreList, LocalTree, RemoteTree, Reporter,
    SyncContext,
};

use crate::config::{encode_section, Config};
use crate::Cli;

struct Session<'a> {
    cli: &'a Cli,
    config: Config,
    endpoint: HttpEndpoint,
    ignores: IgnoreList,
    manifest_path: PathBuf,
    store: ObjectStore,
    local: LocalTree,
    remote: RemoteTree,
    reporter: Reporter,
    have: Option<ObjectId>,
    want: Option<ObjectId>,
    branch_label: String,
    clone: bool,
    repaired: bool,
    keep_pack_path: Option<PathBuf>,
}

pub fn run(cli: &Cli) -> Result<()> {
    let mut config = Config::load(&cli.config_file, &cli.section)?;
    if let Some(depth) = cli.display_depth {
        config.display_depth = depth;
    }
    if let Some(level) = cli.verbosity {
        config.verbosity = level;
    }
    if cli.low_memory {
        config.low_memory = true;
    }

    let mut have: Option<ObjectId> = match &cli.have {
        Some(hex) => Some(hex.parse().context("invalid have checksum")?),
        None => None,
    };
    let mut want: Option<ObjectId> = match &cli.want {
        Some(hex) => Some(hex.parse().context("invalid want checksum")?),
        None => None,
    };
    if cli.tag.is_some() && want.is_some() {
        bail!("a tag and a want cannot both be requested");
    }

    std::fs::create_dir_all(&config.work_directory).with_context(|| {
        format!("cannot create {}", config.work_directory.display())
    })?;

    // The manifest filename is the section with non-alphanumerics
    // percent-encoded; migrate a pre-encoding file if one is present.
    let manifest_path = config.work_directory.join(encode_section(&cli.section));
    let plain_path = config.work_directory.join(&cli.section);
    if plain_path != manifest_path && plain_path.exists() {
        std::fs::rename(&plain_path, &manifest_path).with_context(|| {
            format!("cannot rename {}", manifest_path.display())
        })?;
    }

    if let (Some(pack_path), None) = (&cli.use_pack_file, want) {
        want = want_from_pack_name(pack_path, &cli.section);
    }

    let mut clone = cli.clone;
    let target_exists = config.target_directory.exists();
    let manifest_exists = manifest_path.exists();
    if !target_exists || !manifest_exists {
        clone = true;
    }

    let mut store = ObjectStore::new();
    let mut remote = RemoteTree::new();
    if target_exists && manifest_exists {
        let loaded = load_manifest(&manifest_path, &mut store, !clone)?;
        if have.is_none() {
            have = loaded.have;
        }
        remote = loaded.remote;
    }
    if have.is_none() {
        clone = true;
    }

    let ignores = IgnoreList::new(config.ignores.clone());
    let verbosity = config.verbosity;

    let local = if target_exists {
        if verbosity > 0 {
            eprintln!("# Scanning local repository...");
        }
        scan_local(&config.target_directory, &ignores, &remote)?
    } else {
        LocalTree::default()
    };

    if verbosity > 0 {
        eprintln!("# Host: {}", config.host);
        eprintln!("# Port: {}", config.port);
        if let Some(proxy) = &config.proxy {
            eprintln!("# Proxy Host: {}", proxy.host);
            eprintln!("# Proxy Port: {}", proxy.port);
            if let Some(username) = &proxy.username {
                eprintln!("# Proxy Username: {username}");
            }
        }
        eprintln!("# Repository Path: {}", config.repository_path);
        eprintln!("# Target Directory: {}", config.target_directory.display());
        if let Some(pack_path) = &cli.use_pack_file {
            eprintln!("# Using pack file: {}", pack_path.display());
        }
        if let Some(tag) = &cli.tag {
            eprintln!("# Tag: {tag}");
        }
        if let Some(have) = &have {
            eprintln!("# Have: {have}");
        }
        if let Some(want) = &want {
            eprintln!("# Want: {want}");
        }
        if config.low_memory {
            eprintln!("# Low memory mode: Yes");
        }
    }

    let endpoint = HttpEndpoint {
        host: config.host.clone(),
        port: config.port,
        proxy: config.proxy.clone(),
        user_agent: format!("treeup/{}", env!("CARGO_PKG_VERSION")),
    };
    let reporter = Reporter::new(
        verbosity,
        config.display_depth as usize,
        &config.target_directory,
    );
    let branch_label = config.branch.clone();

    let mut session = Session {
        cli,
        config,
        endpoint,
        ignores,
        manifest_path,
        store,
        local,
        remote,
        reporter,
        have,
        want,
        branch_label,
        clone,
        repaired: false,
        keep_pack_path: None,
    };

    let current = session.synchronize()?;
    session.finish(current)
}

impl Session<'_> {
    fn context(&mut self) -> SyncContext<'_> {
        SyncContext {
            store: &mut self.store,
            local: &mut self.local,
            remote: &mut self.remote,
            ignores: &self.ignores,
            reporter: &mut self.reporter,
            target: &self.config.target_directory,
        }
    }

    /// Run the selected action. Returns true when the tree was already at
    /// the wanted commit.
    fn synchronize(&mut self) -> Result<bool> {
        // A saved pack short-circuits the network entirely.
        if let Some(pack_path) = self.cli.use_pack_file.clone() {
            if pack_path.exists() {
                let action = if self.clone { "clone" } else { "pull" };
                self.reporter.status(&format!("Action: {action}"));

                let mapped = MappedPack::open(&pack_path)?;
                self.ingest_pack(mapped.bytes())?;
                let want = self.want.ok_or_else(|| {
                    anyhow::anyhow!(
                        "cannot determine the want checksum from {}",
                        pack_path.display()
                    )
                })?;
                let manifest_path = self.manifest_path.clone();
                self.context().checkout(&want, &manifest_path)?;
                return Ok(false);
            }
        }

        self.discover()?;
        let want = self.want.expect("discovery always produces a want");

        let current = self.have == Some(want);

        // When pulling, first make sure the local tree is pristine.
        if self.cli.repair || !self.clone {
            let wants = self.context().plan_repairs();
            if let Some(body) = commands::repair_fetch(&wants)? {
                self.reporter.status("Action: repair");
                self.store.replace_duplicates(true);
                let pack = self.fetch_pack(&body)?;
                self.ingest_pack(&pack)?;
                self.context().save_repairs()?;
                self.repaired = true;
            }
        }

        if !current && !self.repaired {
            let action = if self.clone { "clone" } else { "pull" };
            self.reporter.status(&format!("Action: {action}"));

            let body = if self.clone {
                commands::clone_fetch(&want)
            } else {
                let have = self.have.expect("a pull always has a have");
                commands::pull_fetch(&want, &have)
            };
            let pack = self.fetch_pack(&body)?;
            self.ingest_pack(&pack)?;
            let manifest_path = self.manifest_path.clone();
            self.context().checkout(&want, &manifest_path)?;
        }

        Ok(current)
    }

    /// Reference discovery: confirm protocol v2, run ls-refs, pick the
    /// want and the branch label.
    fn discover(&mut self) -> Result<()> {
        let info_refs = format!(
            "{}/info/refs?service=git-upload-pack",
            self.config.repository_path
        );
        let mut progress = TransferProgress::new(self.reporter.verbosity() == 1);
        let response = self.endpoint.get(&info_refs, Some(&mut progress))?;
        if !refs::server_supports_v2(&response.body) {
            bail!(
                "{} does not support the version 2 wire protocol",
                self.config.host
            );
        }

        let response = self.post_upload_pack(&commands::ls_refs())?;
        let advertised = refs::parse_ls_refs(&response)?;

        if self.want.is_some() {
            // A commit given on the command line has no ref to name it.
            self.branch_label = "(detached)".to_string();
        } else {
            let choice = match &self.cli.tag {
                Some(tag) => RefChoice::Tag(tag.clone()),
                None if self.config.branch == "quarterly" => RefChoice::Quarterly,
                None => RefChoice::Branch(self.config.branch.clone()),
            };
            let (want, label) = refs::select_want(&advertised, &choice)
                .with_context(|| format!("in {}", self.config.repository_path))?;
            self.want = Some(want);
            self.branch_label = label;
            self.reporter.status(&format!("Want: {want}"));
        }
        if self.cli.tag.is_none() {
            self.reporter
                .status(&format!("Branch: {}", self.branch_label));
        }

        if self.cli.keep_pack_file {
            let name = format!(
                "{}-{}.pack",
                self.cli.section,
                self.want.expect("want is set by now")
            );
            self.reporter.status(&format!("Saving pack file: {name}"));
            self.keep_pack_path = Some(PathBuf::from(name));
        }
        Ok(())
    }

    fn post_upload_pack(&mut self, body: &[u8]) -> Result<Vec<u8>> {
        let path = format!("{}/git-upload-pack", self.config.repository_path);
        let mut progress = TransferProgress::new(self.reporter.verbosity() == 1);
        let response = self.endpoint.post(&path, body, Some(&mut progress))?;
        Ok(response.body)
    }

    /// POST a fetch command and pull the pack stream out of the response.
    fn fetch_pack(&mut self, body: &[u8]) -> Result<Vec<u8>> {
        let response = self.post_upload_pack(body)?;
        let pack = sideband::extract_pack(&response)?;
        if let Some(keep_path) = &self.keep_pack_path {
            std::fs::write(keep_path, &pack)
                .with_context(|| format!("cannot save {}", keep_path.display()))?;
        }
        Ok(pack)
    }

    /// Decode a pack into the store and resolve every delta, pulling
    /// missing ref-delta bases out of the local tree by content hash.
    fn ingest_pack(&mut self, pack: &[u8]) -> Result<()> {
        if self.config.low_memory {
            let mut scratch = self.manifest_path.as_os_str().to_os_string();
            scratch.push(".tmp");
            self.store.spill_to(Path::new(&scratch))?;
        }
        decode_pack(pack, &mut self.store)?;

        let local = &self.local;
        resolve_deltas(&mut self.store, |id| {
            let path = local.path_of(id)?;
            let node = local.by_path.get(path)?;
            if node.mode.is_dir() {
                return None;
            }
            if node.mode.is_symlink() {
                Some(
                    std::fs::read_link(path)
                        .ok()?
                        .into_os_string()
                        .into_encoded_bytes(),
                )
            } else {
                std::fs::read(path).ok()
            }
        })?;
        Ok(())
    }

    /// Revision file, pruning, notices, and the final status lines.
    fn finish(mut self, current: bool) -> Result<()> {
        if let Some(want) = self.want {
            let label = self.cli.tag.as_deref().unwrap_or(&self.branch_label);
            write_revision(&self.config.target_directory, label, &want)?;
        }

        if !current || self.repaired {
            self.context().prune_stale()?;
        }

        let verbosity = self.reporter.verbosity();
        if verbosity > 0 && !self.reporter.updating_paths().is_empty() {
            eprintln!("#");
            eprintln!("# Please review the following file(s) for important changes.");
            for path in self.reporter.updating_paths() {
                eprintln!("#\t{}", path.display());
            }
            eprintln!("#");
        }

        if self.repaired {
            eprintln!(
                "# The local repository has been repaired.  \
                 Please rerun treeup to pull the latest commit."
            );
        }
        if verbosity > 0 {
            eprintln!("# Done.");
        }
        Ok(())
    }
}

/// Infer the want checksum from a `<section>-<want>.pack` filename.
fn want_from_pack_name(path: &Path, section: &str) -> Option<ObjectId> {
    let name = path.file_name()?.to_str()?;
    let name = name.strip_suffix(".pack").unwrap_or(name);
    let marker = format!("{section}-");
    let start = name.find(&marker)? + marker.len();
    let want = &name[start..];
    if want.len() != 40 {
        return None;
    }
    want.parse().ok()
}
