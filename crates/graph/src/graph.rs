//! Module DAG construction and traversal.

use std::collections::{HashMap, VecDeque};

use sluice_primitives::ModuleDef;

use crate::errors::{GraphError, GraphResult};
use crate::hash;

/// A validated DAG of modules.
///
/// Construction checks name uniqueness, input resolution and acyclicity, and
/// fixes a topological order that every traversal below respects.
#[derive(Debug)]
pub struct ModuleGraph {
    modules: Vec<ModuleDef>,
    by_name: HashMap<String, usize>,
    /// Indices into `modules`, dependency-first.
    topo_order: Vec<usize>,
    /// Position of each module inside `topo_order`.
    topo_rank: HashMap<String, usize>,
    /// Hex content hash per module, computed once at construction.
    hashes: HashMap<String, String>,
}

impl ModuleGraph {
    pub fn new(modules: Vec<ModuleDef>) -> GraphResult<Self> {
        let mut by_name = HashMap::with_capacity(modules.len());
        for (idx, module) in modules.iter().enumerate() {
            if by_name.insert(module.name.clone(), idx).is_some() {
                return Err(GraphError::DuplicateModule(module.name.clone()));
            }
        }

        for module in &modules {
            for input in &module.inputs {
                if !by_name.contains_key(input) {
                    return Err(GraphError::UnknownInput {
                        module: module.name.clone(),
                        input: input.clone(),
                    });
                }
            }
        }

        let topo_order = topo_sort(&modules, &by_name)?;
        let topo_rank = topo_order
            .iter()
            .enumerate()
            .map(|(rank, &idx)| (modules[idx].name.clone(), rank))
            .collect();

        let mut hashes: HashMap<String, String> = HashMap::with_capacity(modules.len());
        for &idx in &topo_order {
            let module = &modules[idx];
            let input_hashes: Vec<&str> = module
                .inputs
                .iter()
                .map(|input| hashes[input].as_str())
                .collect();
            hashes.insert(module.name.clone(), hash::module_hash(module, &input_hashes));
        }

        Ok(Self {
            modules,
            by_name,
            topo_order,
            topo_rank,
            hashes,
        })
    }

    pub fn get(&self, name: &str) -> GraphResult<&ModuleDef> {
        self.by_name
            .get(name)
            .map(|&idx| &self.modules[idx])
            .ok_or_else(|| GraphError::UnknownModule(name.to_owned()))
    }

    pub fn modules(&self) -> &[ModuleDef] {
        &self.modules
    }

    /// Position of a module in the graph-wide topological order.
    pub fn topo_rank(&self, name: &str) -> GraphResult<usize> {
        self.topo_rank
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownModule(name.to_owned()))
    }

    /// Hex-encoded content hash of a module: its binary, behaviour tags and
    /// the hashes of its transitive inputs.  Used as the snapshot cache key.
    pub fn module_hash(&self, name: &str) -> GraphResult<&str> {
        self.hashes
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| GraphError::UnknownModule(name.to_owned()))
    }

    /// All modules the given output module depends on, the output module
    /// included, in topological order.
    pub fn ancestors_of(&self, output_module: &str) -> GraphResult<Vec<&ModuleDef>> {
        let start = *self
            .by_name
            .get(output_module)
            .ok_or_else(|| GraphError::UnknownModule(output_module.to_owned()))?;

        let mut reachable = vec![false; self.modules.len()];
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            if std::mem::replace(&mut reachable[idx], true) {
                continue;
            }
            for input in &self.modules[idx].inputs {
                queue.push_back(self.by_name[input]);
            }
        }

        Ok(self
            .topo_order
            .iter()
            .filter(|&&idx| reachable[idx])
            .map(|&idx| &self.modules[idx])
            .collect())
    }

    /// Direct store-module inputs of the given module.
    pub fn input_stores_of(&self, name: &str) -> GraphResult<Vec<&ModuleDef>> {
        let module = self.get(name)?;
        Ok(module
            .inputs
            .iter()
            .map(|input| &self.modules[self.by_name[input]])
            .filter(|m| m.is_store())
            .collect())
    }
}

/// Kahn's algorithm over input edges; ties broken by declaration order so the
/// result is deterministic for a given module list.
fn topo_sort(modules: &[ModuleDef], by_name: &HashMap<String, usize>) -> GraphResult<Vec<usize>> {
    let mut in_degree = vec![0usize; modules.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); modules.len()];

    for (idx, module) in modules.iter().enumerate() {
        for input in &module.inputs {
            let dep = by_name[input];
            in_degree[idx] += 1;
            dependents[dep].push(idx);
        }
    }

    let mut ready: VecDeque<usize> = (0..modules.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(modules.len());
    while let Some(idx) = ready.pop_front() {
        order.push(idx);
        for &dependent in &dependents[idx] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push_back(dependent);
            }
        }
    }

    if order.len() != modules.len() {
        let stuck = (0..modules.len())
            .find(|&i| in_degree[i] > 0)
            .expect("cycle implies a node with unmet inputs");
        return Err(GraphError::Cycle(modules[stuck].name.clone()));
    }

    Ok(order)
}
