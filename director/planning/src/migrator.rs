// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instance-group renames via `migrated_from`.
//!
//! Before matching runs, records persisted under an old group name are
//! remapped to the declaring group, so the planner sees them as ordinary
//! existing records of the new group (identity, indices, and uuids are all
//! preserved). Validation runs over the whole deployment first: a rename is
//! rejected when the old name is still desired or claimed by two groups.

use crate::errors::PlanningError;
use director_types::ExistingInstanceRecord;
use director_types::InstanceGroupSpec;
use slog::debug;
use slog::o;
use slog::Logger;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct InstanceGroupMigrator {
    log: Logger,
}

impl InstanceGroupMigrator {
    pub fn new(log: &Logger) -> Self {
        Self { log: log.new(o!("component" => "InstanceGroupMigrator")) }
    }

    /// Rewrite `all_existing_records` according to every group's
    /// `migrated_from` declarations. Records of untouched groups pass
    /// through unchanged.
    pub fn migrate(
        &self,
        instance_groups: &[Arc<InstanceGroupSpec>],
        all_existing_records: &[ExistingInstanceRecord],
    ) -> Result<Vec<ExistingInstanceRecord>, PlanningError> {
        let desired_names: BTreeSet<&str> =
            instance_groups.iter().map(|g| g.name.as_str()).collect();

        // old name -> (declaring group, declared az)
        let mut renames: BTreeMap<&str, (&InstanceGroupSpec, Option<&str>)> =
            BTreeMap::new();
        for group in instance_groups {
            for migration in &group.migrated_from {
                if desired_names.contains(migration.name.as_str()) {
                    return Err(PlanningError::MigratedFromStillDesired {
                        group: group.name.clone(),
                        old_name: migration.name.clone(),
                    });
                }
                if let Some((claimed_by, _)) = renames.insert(
                    migration.name.as_str(),
                    (group.as_ref(), migration.az.as_deref()),
                ) {
                    return Err(PlanningError::AmbiguousMigration {
                        old_name: migration.name.clone(),
                        group_a: claimed_by.name.clone(),
                        group_b: group.name.clone(),
                    });
                }
            }
        }

        let mut migrated = Vec::with_capacity(all_existing_records.len());
        for record in all_existing_records {
            let Some(&(group, declared_az)) =
                renames.get(record.job_name.as_str())
            else {
                migrated.push(record.clone());
                continue;
            };
            let mut record = record.clone();
            let az = self.resolve_az(group, &record, declared_az)?;
            debug!(
                self.log, "migrating instance record";
                "from" => &record.job_name,
                "to" => &group.name,
                "uuid" => &record.uuid,
                "az" => az.as_deref().unwrap_or("-"),
            );
            record.job_name = group.name.clone();
            record.availability_zone = az;
            migrated.push(record);
        }
        Ok(migrated)
    }

    /// Zone of a migrated record: the persisted zone when there is one
    /// (which must agree with any zone declared on the migration), otherwise
    /// the declared zone, otherwise the single zone of the target group.
    /// Legacy zone-less records in a multi-zone group are unresolvable.
    fn resolve_az(
        &self,
        group: &InstanceGroupSpec,
        record: &ExistingInstanceRecord,
        declared_az: Option<&str>,
    ) -> Result<Option<String>, PlanningError> {
        match (&record.availability_zone, declared_az) {
            (Some(persisted), Some(declared)) => {
                if persisted != declared {
                    return Err(PlanningError::MigratedFromAzMismatch {
                        old_name: record.job_name.clone(),
                        declared: declared.to_string(),
                        persisted: persisted.clone(),
                        uuid: record.uuid.clone(),
                    });
                }
                Ok(Some(persisted.clone()))
            }
            (Some(persisted), None) => Ok(Some(persisted.clone())),
            (None, Some(declared)) => Ok(Some(declared.to_string())),
            (None, None) => match group.azs.as_slice() {
                [] => Ok(None),
                [only] => Ok(Some(only.name.clone())),
                _ => Err(PlanningError::AmbiguousMigratedFromAz {
                    group: group.name.clone(),
                    old_name: record.job_name.clone(),
                    uuid: record.uuid.clone(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::example::example_instance_group;
    use crate::example::example_record;
    use crate::example::test_logger;
    use director_types::AvailabilityZone;
    use director_types::MigratedFrom;

    fn migrating_group(
        name: &str,
        from: &[(&str, Option<&str>)],
    ) -> Arc<InstanceGroupSpec> {
        let mut group = example_instance_group(name);
        group.migrated_from = from
            .iter()
            .map(|(old, az)| MigratedFrom {
                name: old.to_string(),
                az: az.map(str::to_string),
            })
            .collect();
        Arc::new(group)
    }

    #[test]
    fn records_of_renamed_groups_fan_in_preserving_identity() {
        let migrator = InstanceGroupMigrator::new(&test_logger());
        let groups = vec![migrating_group(
            "web",
            &[("frontend", None), ("router", None)],
        )];
        let records = vec![
            example_record("frontend", 0, Some("z1")),
            example_record("router", 0, Some("z2")),
            example_record("web", 1, Some("z1")),
            example_record("unrelated", 0, None),
        ];

        let migrated =
            migrator.migrate(&groups, &records).expect("migration succeeds");
        let web: Vec<_> =
            migrated.iter().filter(|r| r.job_name == "web").collect();
        assert_eq!(web.len(), 3);
        // Identity travels with the record.
        assert!(web.iter().any(|r| r.uuid == "frontend-0"
            && r.availability_zone.as_deref() == Some("z1")));
        assert!(web.iter().any(|r| r.uuid == "router-0"
            && r.availability_zone.as_deref() == Some("z2")));
        assert!(migrated.iter().any(|r| r.job_name == "unrelated"));
    }

    #[test]
    fn old_name_still_desired_is_rejected() {
        let migrator = InstanceGroupMigrator::new(&test_logger());
        let groups = vec![
            migrating_group("web", &[("frontend", None)]),
            Arc::new(example_instance_group("frontend")),
        ];
        let error = migrator
            .migrate(&groups, &[])
            .expect_err("still-desired old name must fail");
        assert!(matches!(
            error,
            PlanningError::MigratedFromStillDesired { .. }
        ));
    }

    #[test]
    fn one_old_name_cannot_be_claimed_twice() {
        let migrator = InstanceGroupMigrator::new(&test_logger());
        let groups = vec![
            migrating_group("web", &[("frontend", None)]),
            migrating_group("api", &[("frontend", None)]),
        ];
        let error = migrator
            .migrate(&groups, &[])
            .expect_err("double claim must fail");
        match error {
            PlanningError::AmbiguousMigration {
                old_name,
                group_a,
                group_b,
            } => {
                assert_eq!(old_name, "frontend");
                assert_ne!(group_a, group_b);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn declared_az_backfills_legacy_records() {
        let migrator = InstanceGroupMigrator::new(&test_logger());
        let groups =
            vec![migrating_group("web", &[("frontend", Some("z2"))])];
        let records = vec![example_record("frontend", 0, None)];
        let migrated =
            migrator.migrate(&groups, &records).expect("migration succeeds");
        assert_eq!(migrated[0].availability_zone.as_deref(), Some("z2"));
    }

    #[test]
    fn single_az_group_backfills_without_a_declaration() {
        let migrator = InstanceGroupMigrator::new(&test_logger());
        let mut group = example_instance_group("web");
        group.azs = vec![AvailabilityZone::new("z1")];
        group.migrated_from =
            vec![MigratedFrom { name: "frontend".to_string(), az: None }];
        let records = vec![example_record("frontend", 0, None)];
        let migrated = migrator
            .migrate(&[Arc::new(group)], &records)
            .expect("migration succeeds");
        assert_eq!(migrated[0].availability_zone.as_deref(), Some("z1"));
    }

    #[test]
    fn legacy_record_in_multi_az_group_is_ambiguous() {
        let migrator = InstanceGroupMigrator::new(&test_logger());
        let groups = vec![migrating_group("web", &[("frontend", None)])];
        let records = vec![example_record("frontend", 0, None)];
        let error = migrator
            .migrate(&groups, &records)
            .expect_err("zone-less record in multi-zone group must fail");
        assert!(matches!(
            error,
            PlanningError::AmbiguousMigratedFromAz { .. }
        ));
    }

    #[test]
    fn declared_az_must_match_the_persisted_one() {
        let migrator = InstanceGroupMigrator::new(&test_logger());
        let groups =
            vec![migrating_group("web", &[("frontend", Some("z2"))])];

        let agreeing = vec![example_record("frontend", 0, Some("z2"))];
        assert!(migrator.migrate(&groups, &agreeing).is_ok());

        let disagreeing = vec![example_record("frontend", 0, Some("z1"))];
        let error = migrator
            .migrate(&groups, &disagreeing)
            .expect_err("zone mismatch must fail");
        match error {
            PlanningError::MigratedFromAzMismatch {
                declared,
                persisted,
                ..
            } => {
                assert_eq!(declared, "z2");
                assert_eq!(persisted, "z1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
