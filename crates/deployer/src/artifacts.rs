/// This module resolves compiled contract artifacts by name. Both Hardhat's
/// `artifacts/` layout and Foundry's `out/` layout are understood.
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use ethers::{abi::Abi, types::Bytes, utils::hex};
use eyre::{bail, eyre, Result, WrapErr};
use serde::Deserialize;
use tracing::debug;

/// Directories holding compiler inputs and outputs rather than artifacts.
const SKIPPED_DIRS: &[&str] = &["build-info"];

/// Everything needed to deploy a named contract. The ABI is kept around so
/// the constructor can be checked before anything is sent.
#[derive(Clone, Debug)]
pub struct ContractFactory {
    pub name: String,
    pub abi: Abi,
    pub bytecode: Bytes,
}

/// A directory of compiled contract artifacts.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    abi: Abi,
    bytecode: ArtifactBytecode,
    // Hardhat keeps the link references next to the bytecode.
    #[serde(default)]
    link_references: LinkReferences,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ArtifactBytecode {
    // Hardhat: `"bytecode": "0x..."`
    Hex(String),
    // Foundry: `"bytecode": { "object": "0x...", "linkReferences": {...} }`
    Object {
        object: String,
        #[serde(default, rename = "linkReferences")]
        link_references: LinkReferences,
    },
}

/// Source file => library name => placeholder offsets.
type LinkReferences = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Finds the artifact file for `name`. The name is either a bare contract
    /// name like `SecureSwapDEX` or a fully qualified name like
    /// `contracts/SecureSwapDEX.sol:SecureSwapDEX`.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        if !self.root.is_dir() {
            bail!(
                "No artifact named {}: artifacts directory {} does not exist",
                name,
                self.root.display()
            );
        }

        let (maybe_source, contract) = match name.rsplit_once(':') {
            Some((source, contract)) => (Some(Path::new(source)), contract),
            None => (None, name),
        };

        let mut candidates = Vec::new();
        find_artifacts(&self.root, contract, &mut candidates)?;
        candidates.sort();

        if let Some(source) = maybe_source {
            // Foundry flattens the source directories, so the file name alone
            // has to match. The full path breaks ties between equal file names.
            let source_file = source.file_name();
            candidates.retain(|path| path.parent().and_then(Path::file_name) == source_file);
            if candidates.len() > 1 {
                candidates.retain(|path| path.parent().is_some_and(|dir| dir.ends_with(source)));
            }
        }

        match candidates.len() {
            0 => Err(eyre!("No artifact named {}", name)),
            1 => Ok(candidates.remove(0)),
            _ => {
                let names = candidates
                    .iter()
                    .map(|path| self.qualified_name(path, contract))
                    .collect::<Vec<_>>();
                Err(eyre!(
                    "There are multiple artifacts for contract {}, use one of these fully qualified names instead: {}",
                    name,
                    names.join(", ")
                ))
            }
        }
    }

    /// Loads the artifact for `name` and prepares it for deployment.
    pub fn contract_factory(&self, name: &str) -> Result<ContractFactory> {
        let path = self.resolve(name)?;
        debug!(artifact = %path.display(), "resolved contract artifact");
        let contents = fs::read_to_string(&path)
            .wrap_err_with(|| format!("failed to read artifact {}", path.display()))?;
        let contract = name.rsplit_once(':').map_or(name, |(_, contract)| contract);
        parse_artifact(contract, &contents)
            .wrap_err_with(|| format!("invalid artifact {}", path.display()))
    }

    fn qualified_name(&self, path: &Path, contract: &str) -> String {
        let source = path
            .parent()
            .map(|dir| dir.strip_prefix(&self.root).unwrap_or(dir))
            .unwrap_or_else(|| Path::new(""));
        format!("{}:{}", source.display(), contract)
    }
}

/// Recursively collects the `<contract>.json` files under `dir`.
fn find_artifacts(dir: &Path, contract: &str, found: &mut Vec<PathBuf>) -> Result<()> {
    let file_name = format!("{}.json", contract);
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            let skipped = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| SKIPPED_DIRS.contains(&name));
            if !skipped {
                find_artifacts(&path, contract, found)?;
            }
        } else if path.file_name().and_then(|name| name.to_str()) == Some(file_name.as_str()) {
            found.push(path);
        }
    }
    Ok(())
}

fn parse_artifact(contract: &str, contents: &str) -> Result<ContractFactory> {
    let artifact: ArtifactFile = serde_json::from_str(contents)?;
    let (object, link_references) = match artifact.bytecode {
        ArtifactBytecode::Hex(object) => (object, artifact.link_references),
        ArtifactBytecode::Object {
            object,
            link_references,
        } => (object, link_references),
    };

    let object = object.trim().trim_start_matches("0x");
    if object.is_empty() {
        bail!(
            "{} is abstract or an interface and can't be deployed",
            contract
        );
    }

    let libraries = link_references
        .iter()
        .flat_map(|(source, libraries)| {
            libraries
                .keys()
                .map(move |library| format!("{}:{}", source, library))
        })
        .collect::<Vec<_>>();
    if !libraries.is_empty() {
        bail!(
            "{} is missing links for the following libraries: {}",
            contract,
            libraries.join(", ")
        );
    }
    if object.contains("__") {
        bail!("{} has unlinked library placeholders in its bytecode", contract);
    }

    let bytecode = hex::decode(object)
        .wrap_err_with(|| format!("{} bytecode is not valid hex", contract))?;

    Ok(ContractFactory {
        name: contract.to_string(),
        abi: artifact.abi,
        bytecode: bytecode.into(),
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const HARDHAT_ARTIFACT: &str = r#"{
        "_format": "hh-sol-artifact-1",
        "contractName": "SecureSwapDEX",
        "sourceName": "contracts/SecureSwapDEX.sol",
        "abi": [
            { "inputs": [], "stateMutability": "nonpayable", "type": "constructor" }
        ],
        "bytecode": "0x60006000f3",
        "deployedBytecode": "0x",
        "linkReferences": {},
        "deployedLinkReferences": {}
    }"#;

    const FOUNDRY_ARTIFACT: &str = r#"{
        "abi": [],
        "bytecode": { "object": "0x60006000f3", "sourceMap": "", "linkReferences": {} },
        "deployedBytecode": { "object": "0x", "sourceMap": "", "linkReferences": {} }
    }"#;

    fn write(root: &Path, relative: &str, contents: &str) -> Result<()> {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().ok_or_else(|| eyre!("no parent"))?)?;
        fs::write(path, contents)?;
        Ok(())
    }

    #[test]
    fn test_hardhat_artifact() -> Result<()> {
        let dir = TempDir::new()?;
        write(
            dir.path(),
            "contracts/SecureSwapDEX.sol/SecureSwapDEX.json",
            HARDHAT_ARTIFACT,
        )?;
        write(
            dir.path(),
            "contracts/SecureSwapDEX.sol/SecureSwapDEX.dbg.json",
            r#"{ "buildInfo": "../../build-info/abc.json" }"#,
        )?;
        write(dir.path(), "build-info/SecureSwapDEX.json", "{}")?;

        let factory = ArtifactStore::new(dir.path()).contract_factory("SecureSwapDEX")?;
        assert_eq!(factory.name, "SecureSwapDEX");
        assert_eq!(factory.bytecode.to_vec(), vec![0x60, 0x00, 0x60, 0x00, 0xf3]);
        assert!(factory.abi.constructor().is_some());

        Ok(())
    }

    #[test]
    fn test_foundry_artifact() -> Result<()> {
        let dir = TempDir::new()?;
        write(dir.path(), "SecureSwapDEX.sol/SecureSwapDEX.json", FOUNDRY_ARTIFACT)?;

        let factory = ArtifactStore::new(dir.path()).contract_factory("SecureSwapDEX")?;
        assert_eq!(factory.bytecode.to_vec(), vec![0x60, 0x00, 0x60, 0x00, 0xf3]);
        assert!(factory.abi.constructor().is_none());

        Ok(())
    }

    #[test]
    fn test_missing_artifact() -> Result<()> {
        let dir = TempDir::new()?;
        write(dir.path(), "contracts/Token.sol/Token.json", HARDHAT_ARTIFACT)?;

        let error = ArtifactStore::new(dir.path())
            .contract_factory("SecureSwapDEX")
            .unwrap_err();
        assert_eq!(error.to_string(), "No artifact named SecureSwapDEX");

        Ok(())
    }

    #[test]
    fn test_missing_artifacts_directory() -> Result<()> {
        let dir = TempDir::new()?;
        let error = ArtifactStore::new(dir.path().join("artifacts"))
            .resolve("SecureSwapDEX")
            .unwrap_err();
        assert!(error
            .to_string()
            .starts_with("No artifact named SecureSwapDEX"));

        Ok(())
    }

    #[test]
    fn test_ambiguous_name() -> Result<()> {
        let dir = TempDir::new()?;
        write(
            dir.path(),
            "contracts/SecureSwapDEX.sol/SecureSwapDEX.json",
            HARDHAT_ARTIFACT,
        )?;
        write(
            dir.path(),
            "contracts/legacy/SecureSwapDEX.sol/SecureSwapDEX.json",
            HARDHAT_ARTIFACT,
        )?;
        let store = ArtifactStore::new(dir.path());

        let error = store.resolve("SecureSwapDEX").unwrap_err().to_string();
        assert!(error.contains("multiple artifacts"));
        assert!(error.contains("contracts/SecureSwapDEX.sol:SecureSwapDEX"));
        assert!(error.contains("contracts/legacy/SecureSwapDEX.sol:SecureSwapDEX"));

        // A fully qualified name picks one of them.
        let path = store.resolve("contracts/legacy/SecureSwapDEX.sol:SecureSwapDEX")?;
        assert!(path.ends_with("contracts/legacy/SecureSwapDEX.sol/SecureSwapDEX.json"));
        let path = store.resolve("contracts/SecureSwapDEX.sol:SecureSwapDEX")?;
        assert!(path.ends_with("contracts/SecureSwapDEX.sol/SecureSwapDEX.json"));
        assert!(!path.to_string_lossy().contains("legacy"));

        Ok(())
    }

    #[test]
    fn test_abstract_contract() {
        let artifact = r#"{ "abi": [], "bytecode": "0x" }"#;
        let error = parse_artifact("ISecureSwapDEX", artifact).unwrap_err();
        assert_eq!(
            error.to_string(),
            "ISecureSwapDEX is abstract or an interface and can't be deployed"
        );
    }

    #[test]
    fn test_unlinked_library() {
        let artifact = r#"{
            "abi": [],
            "bytecode": "0x6080__$1234567890abcdef1234567890abcdef12$__6000",
            "linkReferences": {
                "contracts/SwapMath.sol": { "SwapMath": [{ "length": 20, "start": 2 }] }
            }
        }"#;
        let error = parse_artifact("SecureSwapDEX", artifact).unwrap_err();
        assert_eq!(
            error.to_string(),
            "SecureSwapDEX is missing links for the following libraries: contracts/SwapMath.sol:SwapMath"
        );
    }

    #[test]
    fn test_invalid_bytecode() {
        let artifact = r#"{ "abi": [], "bytecode": "0xzz" }"#;
        let error = parse_artifact("SecureSwapDEX", artifact).unwrap_err();
        assert_eq!(error.to_string(), "SecureSwapDEX bytecode is not valid hex");
    }
}
