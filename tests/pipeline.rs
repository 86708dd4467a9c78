//! End-to-end runs of the orchestrator with shell scripts standing in for the scientific tools

use std::cell::RefCell;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dockflow::command::{CommandRunner, ToolError};
use dockflow::db::open::open_in_memory;
use dockflow::pipeline::result::JobStatus;
use dockflow::pipeline::state::JobState;
use dockflow::pipeline::{FailureCause, Pipeline, PipelineOptions};
use dockflow::request::job::JobRequest;
use dockflow::stages::tools::ToolConfig;
use dockflow::stages::StageError;
use dockflow::storage::local::LocalGateway;
use dockflow::storage::{GatewayError, StorageGateway};
use tempfile::TempDir;

const RECEPTOR_WITH_CELL: &str = "\
HEADER    TRANSFERASE                             01-JAN-00   1ABC
CRYST1   57.570   57.570  111.290  90.00  90.00 120.00 P 31 2 1     6
ATOM      1  N   GLU A   1      10.000  20.000  30.000  1.00  0.00           N
ATOM      2  CA  GLU A   1      11.000  20.000  30.000  1.00  0.00           C
HETATM    3  C1  STI A 201      12.000  21.000  31.000  1.00  0.00           C
END
";

const RECEPTOR_WITHOUT_CELL: &str = "\
ATOM      1  N   GLU A   1      10.000  20.000  30.000  1.00  0.00           N
HETATM    2  O   HOH A 301      12.000  21.000  31.000  1.00  0.00           O
END
";

/// Shared helper: print the value following a flag
const VALUE_OF: &str = r#"value_of() { flag="$1"; shift; while [ $# -gt 0 ]; do if [ "$1" = "$flag" ]; then echo "$2"; return; fi; shift; done; }"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new(receptor: &str) -> Fixture {
        let fixture = Fixture { dir: tempfile::tempdir().unwrap() };
        let store = fixture.store();
        fs::create_dir_all(store.join("inputs")).unwrap();
        fs::write(store.join("inputs/imatinib.smi"), "CC1=C(C=C(C=C1)NC(=O)C2=CC=C(C=C2)CN3CCN(CC3)C)NC4=NC=CC(=N4)C5=CN=CC=C5\n").unwrap();
        fs::write(store.join("inputs/1abc.pdb"), receptor).unwrap();
        fs::write(store.join("inputs/box.txt"), "center_x = 1.0\n").unwrap();
        fs::create_dir_all(fixture.bin()).unwrap();
        fs::create_dir_all(fixture.dir.path().join("geostd")).unwrap();

        fixture.script("scrub", &format!(
            "{VALUE_OF}\necho \"scrub $*\" >> {calls}\nout=$(value_of -o \"$@\")\necho \"$1\" > \"$out\"\n",
            calls = fixture.calls_log().display()
        ));
        fixture.script("prepare_ligand", &format!(
            "{VALUE_OF}\necho \"prepare_ligand $*\" >> {calls}\nout=$(value_of --multimol_outdir \"$@\")\nmkdir -p \"$out\"\necho ligand0 > \"$out/_i0.pdbqt\"\necho ligand1 > \"$out/_i1.pdbqt\"\n",
            calls = fixture.calls_log().display()
        ));
        fixture.script("python", &format!(
            r#"echo "python $*" >> {calls}
if [ "$1" = "-" ]; then
  cat > /dev/null
  if [ $# -eq 4 ]; then grep -v " $4 " "$2" > "$3"; exit 0; fi
  grep '^ATOM' "$2" > "$3"
  exit 0
fi
[ -n "$MMTBX_CCP4_MONOMER_LIB" ] || {{ echo "monomer library not set" >&2; exit 2; }}
echo "reduce2 cwd $(pwd)" >> {calls}
stem=$(basename "$2" .pdb)
{{ cat "$2"; echo "REMARK hydrogens added"; }} > "${{stem}}FH.pdb"
"#,
            calls = fixture.calls_log().display()
        ));
        fixture.script("prepare_receptor", &format!(
            "{VALUE_OF}\necho \"prepare_receptor $*\" >> {calls}\nout=$(value_of -o \"$@\")\necho receptor > \"$out.pdbqt\"\necho box > \"$out.box.txt\"\n",
            calls = fixture.calls_log().display()
        ));
        fixture.script("vina", &format!(
            "{VALUE_OF}\necho \"vina $*\" >> {calls}\nconfig=$(value_of --config \"$@\")\n[ -f \"$config\" ] || {{ echo \"missing $config\" >&2; exit 5; }}\nout=$(value_of --out \"$@\")\necho poses > \"$out\"\n",
            calls = fixture.calls_log().display()
        ));
        fixture.script("export", &format!(
            "{VALUE_OF}\necho \"export $*\" >> {calls}\nout=$(value_of -s \"$@\")\necho pose > \"$out\"\n",
            calls = fixture.calls_log().display()
        ));
        fixture
    }

    fn store(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    fn scratch(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    fn bin(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    fn calls_log(&self) -> PathBuf {
        self.dir.path().join("calls.log")
    }

    fn script(&self, name: &str, body: &str) {
        fs::write(self.bin().join(format!("{name}.sh")), body).unwrap();
    }

    fn tool(&self, name: &str) -> String {
        self.bin().join(format!("{name}.sh")).to_string_lossy().into_owned()
    }

    fn tools(&self) -> ToolConfig {
        ToolConfig {
            launcher: vec!["sh".to_string()],
            python: self.tool("python"),
            scrub: self.tool("scrub"),
            prepare_ligand: self.tool("prepare_ligand"),
            prepare_receptor: self.tool("prepare_receptor"),
            reduce2_script: PathBuf::from("/opt/conda/envs/dwa_env/reduce2.py"),
            monomer_library: self.dir.path().join("geostd"),
            vina: self.tool("vina"),
            export: self.tool("export"),
            grep: "grep".to_string(),
        }
    }

    fn pipeline(&self, gateway: TestGateway, keep_workspace: bool) -> Pipeline<TestGateway> {
        let mut options = PipelineOptions::new(self.scratch());
        options.keep_workspace = keep_workspace;
        Pipeline::new(gateway, CommandRunner::new(), self.tools(), options)
    }

    fn gateway(&self) -> TestGateway {
        TestGateway::new(&self.store())
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.calls_log())
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    fn workspace(&self, job_id: &str) -> PathBuf {
        self.scratch().join(format!("job-{job_id}")).canonicalize().unwrap()
    }
}

fn request() -> JobRequest {
    JobRequest {
        ligand: "inputs/imatinib.smi".to_string(),
        receptor: "inputs/1abc.pdb".to_string(),
        binding_box: "inputs/box.txt".to_string(),
        output_dir: "results/run-1".to_string(),
        strip_residue: None,
    }
}

/// Local storage that can refuse uploads and records what the workspace held at fetch time
struct TestGateway {
    inner: LocalGateway,
    reject: Vec<String>,
    seen_at_fetch: RefCell<Vec<Vec<String>>>,
}

impl TestGateway {
    fn new(store: &Path) -> TestGateway {
        TestGateway { inner: LocalGateway::new(store), reject: Vec::new(), seen_at_fetch: RefCell::new(Vec::new()) }
    }

    fn rejecting(mut self, name: &str) -> TestGateway {
        self.reject.push(name.to_string());
        self
    }
}

impl StorageGateway for TestGateway {
    async fn fetch(&self, reference: &str, dest_dir: &Path) -> Result<PathBuf, GatewayError> {
        // dest_dir is <workspace>/inputs/<role>
        let root = dest_dir.parent().and_then(Path::parent).unwrap();
        let mut entries: Vec<String> = fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        self.seen_at_fetch.borrow_mut().push(entries);
        self.inner.fetch(reference, dest_dir).await
    }

    async fn publish(&self, local: &Path, namespace: &str, name: &str) -> bool {
        if self.reject.iter().any(|r| r == name) {
            return false;
        }
        self.inner.publish(local, namespace, name).await
    }
}

#[tokio::test]
async fn successful_job_publishes_all_deliverables() {
    let fixture = Fixture::new(RECEPTOR_WITH_CELL);
    let ledger = open_in_memory().unwrap();
    let pipeline = fixture.pipeline(fixture.gateway(), false);

    let result = pipeline.run("ok", &request(), Some(&ledger)).await.unwrap();

    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.outputs, vec!["docking.pdbqt", "pose.sdf", "receptor_cryst1FH.pdb"]);
    assert!(result.failed_files.is_empty());
    for name in &result.outputs {
        assert!(fixture.store().join("results/run-1").join(name).is_file(), "{name} not published");
    }

    let tools: Vec<String> = fixture
        .calls()
        .iter()
        .map(|line| line.split(' ').next().unwrap().to_string())
        .collect();
    assert_eq!(tools, vec!["scrub", "prepare_ligand", "python", "python", "reduce2", "prepare_receptor", "vina", "export"]);

    assert_eq!(
        ledger.transitions("ok").unwrap(),
        vec![
            "initialized", "cleaned", "inputs_fetched", "ligand_ready", "receptor_ready",
            "docked", "exported", "published", "succeeded"
        ]
    );
    // workspace removed by default
    assert!(!fixture.scratch().join("job-ok").exists());
}

#[tokio::test]
async fn workspace_is_empty_before_inputs_are_fetched() {
    let fixture = Fixture::new(RECEPTOR_WITH_CELL);
    let stale = fixture.scratch().join("job-rerun");
    fs::create_dir_all(stale.join("ligand_protomers")).unwrap();
    fs::write(stale.join("ligand_protomers/_i0.pdbqt"), "stale ligand").unwrap();
    fs::write(stale.join("docking.pdbqt"), "stale docking").unwrap();

    let pipeline = fixture.pipeline(fixture.gateway(), true);
    pipeline.run("rerun", &request(), None).await.unwrap();

    let seen = pipeline.gateway().seen_at_fetch.borrow();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].is_empty(), "workspace held {:?} before the first fetch", seen[0]);
    let ligand = fs::read_to_string(fixture.workspace("rerun").join("ligand_protomers/_i0.pdbqt")).unwrap();
    assert_eq!(ligand, "ligand0\n");
}

#[tokio::test]
async fn crystal_record_leads_the_merged_receptor() {
    let fixture = Fixture::new(RECEPTOR_WITH_CELL);
    let pipeline = fixture.pipeline(fixture.gateway(), true);
    pipeline.run("cell", &request(), None).await.unwrap();

    let ws = fixture.workspace("cell");
    let merged = fs::read_to_string(ws.join("receptor_cryst1.pdb")).unwrap();
    assert!(merged.starts_with("CRYST1   57.570   57.570  111.290"));
    assert_eq!(merged.lines().count(), 3);
    assert!(!merged.contains("HETATM"));
}

#[tokio::test]
async fn receptor_without_crystal_record_is_left_unchanged() {
    let fixture = Fixture::new(RECEPTOR_WITHOUT_CELL);
    let pipeline = fixture.pipeline(fixture.gateway(), true);
    pipeline.run("nocell", &request(), None).await.unwrap();

    let ws = fixture.workspace("nocell");
    let atoms = fs::read_to_string(ws.join("receptor_atoms.pdb")).unwrap();
    let merged = fs::read_to_string(ws.join("receptor_cryst1.pdb")).unwrap();
    assert_eq!(merged, atoms);
    assert!(merged.starts_with("ATOM"));
}

#[tokio::test]
async fn docking_reads_the_box_next_to_the_prepared_receptor() {
    let fixture = Fixture::new(RECEPTOR_WITH_CELL);
    let pipeline = fixture.pipeline(fixture.gateway(), true);
    pipeline.run("box", &request(), None).await.unwrap();

    let ws = fixture.workspace("box");
    let vina = fixture.calls().into_iter().find(|line| line.starts_with("vina")).unwrap();
    assert!(vina.contains(&format!("--receptor {}", ws.join("receptor_prepared.pdbqt").display())));
    assert!(vina.contains(&format!("--config {}", ws.join("receptor_prepared.box.txt").display())));
    assert!(vina.contains(&format!("--ligand {}", ws.join("ligand_protomers/_i0.pdbqt").display())));
}

#[tokio::test]
async fn hydrogenation_runs_in_the_workspace_without_moving_the_process() {
    let fixture = Fixture::new(RECEPTOR_WITH_CELL);
    let before = env::current_dir().unwrap();
    let pipeline = fixture.pipeline(fixture.gateway(), true);
    pipeline.run("cwd", &request(), None).await.unwrap();

    assert_eq!(env::current_dir().unwrap(), before);
    let reduce = fixture.calls().into_iter().find(|line| line.starts_with("reduce2")).unwrap();
    assert_eq!(reduce, format!("reduce2 cwd {}", fixture.workspace("cwd").display()));
}

#[tokio::test]
async fn hydrogenation_failure_leaves_the_working_directory_alone() {
    let fixture = Fixture::new(RECEPTOR_WITH_CELL);
    let mut tools = fixture.tools();
    tools.monomer_library = PathBuf::new();
    let before = env::current_dir().unwrap();
    let mut options = PipelineOptions::new(fixture.scratch());
    options.keep_workspace = true;
    let pipeline = Pipeline::new(fixture.gateway(), CommandRunner::new(), tools, options);

    // an empty monomer library path makes the fake reduce2 fail
    let err = pipeline.run("cwd-fail", &request(), None).await.unwrap_err();

    assert_eq!(err.state, JobState::LigandReady);
    assert_eq!(env::current_dir().unwrap(), before);
}

#[tokio::test]
async fn missing_pose_downgrades_to_partial_success() {
    let fixture = Fixture::new(RECEPTOR_WITH_CELL);
    fixture.script("export", "exit 0\n");
    let pipeline = fixture.pipeline(fixture.gateway(), false);

    let result = pipeline.run("nopose", &request(), None).await.unwrap();

    assert_eq!(result.status, JobStatus::PartialSuccess);
    assert_eq!(result.outputs, vec!["docking.pdbqt", "receptor_cryst1FH.pdb"]);
    assert_eq!(result.failed_files, vec!["pose.sdf"]);
}

#[tokio::test]
async fn rejected_upload_downgrades_to_partial_success() {
    let fixture = Fixture::new(RECEPTOR_WITH_CELL);
    let ledger = open_in_memory().unwrap();
    let pipeline = fixture.pipeline(fixture.gateway().rejecting("docking.pdbqt"), false);

    let result = pipeline.run("reject", &request(), Some(&ledger)).await.unwrap();

    assert_eq!(result.status, JobStatus::PartialSuccess);
    assert_eq!(result.outputs, vec!["pose.sdf", "receptor_cryst1FH.pdb"]);
    assert_eq!(result.failed_files, vec!["docking.pdbqt"]);
    assert_eq!(ledger.job("reject").unwrap().unwrap().state, "partially_succeeded");
}

#[tokio::test]
async fn ligand_tool_failure_stops_the_job() {
    let fixture = Fixture::new(RECEPTOR_WITH_CELL);
    fixture.script("scrub", &format!("echo \"scrub $*\" >> {}\necho 'bad smiles' >&2\nexit 3\n", fixture.calls_log().display()));
    let ledger = open_in_memory().unwrap();
    let pipeline = fixture.pipeline(fixture.gateway(), false);

    let err = pipeline.run("badlig", &request(), Some(&ledger)).await.unwrap_err();

    assert_eq!(err.state, JobState::InputsFetched);
    assert!(err.to_string().starts_with("workflow failed: "));
    match &err.cause {
        FailureCause::Stage(StageError::Tool(ToolError::NonZeroExit { exit_code, stderr, .. })) => {
            assert_eq!(*exit_code, Some(3));
            assert_eq!(stderr, "bad smiles\n");
        }
        other => panic!("unexpected cause {other:?}"),
    }
    // nothing after ligand preparation ran
    let calls = fixture.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("scrub"));
    assert!(!fixture.store().join("results").exists());

    let record = ledger.job("badlig").unwrap().unwrap();
    assert_eq!(record.state, "failed");
    assert_eq!(record.status.as_deref(), Some("failure"));
}

#[tokio::test]
async fn missing_input_fails_at_fetch() {
    let fixture = Fixture::new(RECEPTOR_WITH_CELL);
    let pipeline = fixture.pipeline(fixture.gateway(), false);
    let mut missing = request();
    missing.receptor = "inputs/absent.pdb".to_string();

    let err = pipeline.run("nofetch", &missing, None).await.unwrap_err();

    assert_eq!(err.state, JobState::Cleaned);
    assert!(matches!(&err.cause, FailureCause::Fetch { reference, source: GatewayError::NotFound(_) } if reference == "inputs/absent.pdb"));
    assert!(fixture.calls().is_empty());
}

#[tokio::test]
async fn bound_ligand_is_removed_before_extraction() {
    let fixture = Fixture::new(RECEPTOR_WITH_CELL);
    let pipeline = fixture.pipeline(fixture.gateway(), true);
    let mut with_strip = request();
    with_strip.strip_residue = Some("STI".to_string());

    pipeline.run("strip", &with_strip, None).await.unwrap();

    let ws = fixture.workspace("strip");
    let stripped = fs::read_to_string(ws.join("receptor_no_ligand.pdb")).unwrap();
    assert!(!stripped.contains("STI"));
    let python = fixture.calls().into_iter().find(|line| line.starts_with("python")).unwrap();
    assert!(python.ends_with(" STI"));
    // the cell record is still taken from the raw upload
    let merged = fs::read_to_string(ws.join("receptor_cryst1.pdb")).unwrap();
    assert!(merged.starts_with("CRYST1"));
}
