use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

pub const REWARD_HISTORY_FILE: &str = "reward_history.json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalStats {
    pub episodes: usize,
    pub avg_reward: f64,
    pub best_reward: f64,
    pub last_reward: f64,
}

/// Summary of a run's per-episode rewards. All zero for an empty history.
pub fn summarize(history: &[f64]) -> EvalStats {
    if history.is_empty() {
        return EvalStats {
            episodes: 0,
            avg_reward: 0.0,
            best_reward: 0.0,
            last_reward: 0.0,
        };
    }
    let total: f64 = history.iter().sum();
    EvalStats {
        episodes: history.len(),
        avg_reward: total / history.len() as f64,
        best_reward: history.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        last_reward: history[history.len() - 1],
    }
}

pub fn save_reward_history(history: &[f64], dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(REWARD_HISTORY_FILE);
    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer(writer, history)?;
    Ok(path)
}

pub fn load_reward_history(path: &Path) -> Result<Vec<f64>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = std::io::BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_of_history() {
        let stats = summarize(&[2.0, 10.0, 3.0]);
        assert_eq!(stats.episodes, 3);
        assert_eq!(stats.avg_reward, 5.0);
        assert_eq!(stats.best_reward, 10.0);
        assert_eq!(stats.last_reward, 3.0);
    }

    #[test]
    fn empty_history_is_all_zero() {
        let stats = summarize(&[]);
        assert_eq!(stats.episodes, 0);
        assert_eq!(stats.best_reward, 0.0);
    }

    #[test]
    fn history_survives_disk() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("run");
        let path = save_reward_history(&[1.0, 0.0, 4.5], &nested).unwrap();
        assert_eq!(path, nested.join(REWARD_HISTORY_FILE));
        assert_eq!(load_reward_history(&path).unwrap(), vec![1.0, 0.0, 4.5]);
    }
}
