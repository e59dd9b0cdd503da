//! Splitting the registered workers into loaders and appliers.

use fastrestore_types::NodeId;

use crate::{Error, Result};

/// Role layout of one restore request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roles {
    pub loaders: Vec<NodeId>,
    pub appliers: Vec<NodeId>,
    /// Applier that collects samples and computes key ranges.
    pub master_applier: NodeId,
}

impl Roles {
    /// Assigns roles to `workers` (sorted by id) with `loader_ratio`
    /// loaders per applier: `n * ratio / (ratio + 1)` loaders, at least one,
    /// and the remaining workers as appliers. The last applier is the master
    /// applier.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] with fewer than two workers.
    pub fn assign(workers: &[NodeId], loader_ratio: u32) -> Result<Self> {
        let n = workers.len();
        if n < 2 {
            return Err(Error::Config(format!(
                "a restore needs at least one loader and one applier, {n} worker(s) registered"
            )));
        }
        let ratio = loader_ratio.max(1) as usize;
        let num_loaders = (n * ratio / (ratio + 1)).clamp(1, n - 1);

        let mut workers = workers.to_vec();
        workers.sort();
        let appliers = workers.split_off(num_loaders);
        let master_applier = *appliers.last().ok_or_else(|| Error::Config("no appliers".to_string()))?;

        Ok(Self {
            loaders: workers,
            appliers,
            master_applier,
        })
    }

    /// Every worker taking part in the request.
    pub fn all(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.loaders.iter().chain(&self.appliers).copied()
    }

    pub fn len(&self) -> usize {
        self.loaders.len() + self.appliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn nodes(n: u32) -> Vec<NodeId> {
        (1..=n).map(NodeId::new).collect()
    }

    #[test_case(4, 1, 2, 2; "even split")]
    #[test_case(3, 1, 1, 2; "odd split favors appliers")]
    #[test_case(5, 4, 4, 1; "loader heavy keeps one applier")]
    #[test_case(2, 9, 1, 1; "minimum cluster")]
    fn test_split(n: u32, ratio: u32, loaders: usize, appliers: usize) {
        let roles = Roles::assign(&nodes(n), ratio).unwrap();
        assert_eq!(roles.loaders.len(), loaders);
        assert_eq!(roles.appliers.len(), appliers);
        assert_eq!(roles.master_applier, *roles.appliers.last().unwrap());
        assert_eq!(roles.all().count(), n as usize);
    }

    #[test]
    fn test_lowest_ids_load() {
        let roles = Roles::assign(&[NodeId::new(4), NodeId::new(1), NodeId::new(3), NodeId::new(2)], 1).unwrap();
        assert_eq!(roles.loaders, vec![NodeId::new(1), NodeId::new(2)]);
        assert_eq!(roles.master_applier, NodeId::new(4));
    }

    #[test]
    fn test_single_worker_rejected() {
        assert!(matches!(Roles::assign(&nodes(1), 1), Err(Error::Config(_))));
    }
}
