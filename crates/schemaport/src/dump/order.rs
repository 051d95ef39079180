//! Foreign key dependency ordering.

use std::collections::{BTreeSet, HashMap};

use crate::core::{ForeignKey, Table};

/// Tables ordered referenced-before-referencing.
#[derive(Debug, Clone)]
pub struct DependencyOrder {
    /// Tables in emission order.
    pub tables: Vec<Table>,
    position: HashMap<String, usize>,
    cyclic: bool,
}

impl DependencyOrder {
    /// Order `tables` with Kahn's algorithm.
    ///
    /// Ties keep the input order. Tables caught in a cycle (a self-reference
    /// included) follow the acyclic ones, in input order.
    pub fn new(tables: Vec<Table>) -> Self {
        let index: HashMap<String, usize> = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.to_lowercase(), i))
            .collect();

        let mut in_degree = vec![0usize; tables.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
        let mut cyclic = false;

        for (i, table) in tables.iter().enumerate() {
            let mut seen = BTreeSet::new();
            for fk in &table.foreign_keys {
                let Some(&parent) = index.get(&fk.ref_table.to_lowercase()) else {
                    continue;
                };
                if parent == i {
                    cyclic = true;
                    continue;
                }
                if seen.insert(parent) {
                    in_degree[i] += 1;
                    dependents[parent].push(i);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..tables.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(tables.len());
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &child in &dependents[i] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        if order.len() < tables.len() {
            cyclic = true;
            let placed: BTreeSet<usize> = order.iter().copied().collect();
            order.extend((0..tables.len()).filter(|i| !placed.contains(i)));
        }

        let mut slots: Vec<Option<Table>> = tables.into_iter().map(Some).collect();
        let tables: Vec<Table> = order.iter().filter_map(|&i| slots[i].take()).collect();
        let position = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.to_lowercase(), i))
            .collect();

        Self {
            tables,
            position,
            cyclic,
        }
    }

    /// True when some foreign key points at its own table or a later one.
    pub fn has_cycle(&self) -> bool {
        self.cyclic
    }

    /// True when `fk` of `table` cannot be declared at creation time because
    /// its referenced table is not created yet.
    ///
    /// Foreign keys to tables outside the set are never deferred.
    pub fn is_deferred(&self, table: &Table, fk: &ForeignKey) -> bool {
        let own = self.position.get(&table.name.to_lowercase());
        let referenced = self.position.get(&fk.ref_table.to_lowercase());
        match (own, referenced) {
            (Some(own), Some(referenced)) => referenced >= own,
            _ => false,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, LogicalType};

    fn table(name: &str, refs: &[&str]) -> Table {
        let mut t = Table::new(name)
            .column(Column::new("id", LogicalType::Integer).not_null())
            .primary_key(["id"]);
        for r in refs {
            let col = format!("{}_id", r);
            t = t
                .column(Column::new(col.clone(), LogicalType::Integer))
                .foreign_key(ForeignKey::new(vec![col], *r, vec!["id".to_string()]));
        }
        t
    }

    #[test]
    fn test_referenced_tables_come_first() {
        let order = DependencyOrder::new(vec![
            table("tasks", &["projects", "users"]),
            table("projects", &["users"]),
            table("users", &[]),
            table("tags", &[]),
        ]);
        assert_eq!(order.names(), vec!["users", "tags", "projects", "tasks"]);
        assert!(!order.has_cycle());

        let tasks = &order.tables[3];
        assert!(!order.is_deferred(tasks, &tasks.foreign_keys[0]));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let order = DependencyOrder::new(vec![table("employees", &["employees"])]);
        assert!(order.has_cycle());
        let t = &order.tables[0];
        assert!(order.is_deferred(t, &t.foreign_keys[0]));
    }

    #[test]
    fn test_mutual_references_are_appended() {
        let order = DependencyOrder::new(vec![
            table("a", &["b"]),
            table("b", &["a"]),
            table("root", &[]),
        ]);
        assert!(order.has_cycle());
        assert_eq!(order.names(), vec!["root", "a", "b"]);

        let a = &order.tables[1];
        let b = &order.tables[2];
        assert!(order.is_deferred(a, &a.foreign_keys[0]));
        assert!(!order.is_deferred(b, &b.foreign_keys[0]));
    }

    #[test]
    fn test_external_references_are_ignored() {
        let order = DependencyOrder::new(vec![table("orders", &["customers"])]);
        assert!(!order.has_cycle());
        let t = &order.tables[0];
        assert!(!order.is_deferred(t, &t.foreign_keys[0]));
    }
}
