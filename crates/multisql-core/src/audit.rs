//! Audit field stamping applied right before binding.

use chrono::{NaiveDateTime, Utc};

use crate::dialect::SqlContext;
use crate::schema::{ColumnDescriptor, ColumnRole};
use crate::value::SqlValue;

/// Who and where a write comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditContext {
    /// Acting user, stamped on insert/update user columns when present.
    pub user: Option<String>,
    /// Origin (application or host name).
    pub origin: String,
    /// Timestamp used for auto dates, in UTC.
    pub now: NaiveDateTime,
}

impl AuditContext {
    /// Audit context stamped with the current UTC time.
    pub fn now(user: Option<String>, origin: impl Into<String>) -> Self {
        Self {
            user,
            origin: origin.into(),
            now: Utc::now().naive_utc(),
        }
    }
}

/// Stamps insert audit fields: both auto dates when the server does not
/// manage them, the inserting user and the origin.
pub fn stamp_insert(columns: &mut [ColumnDescriptor], ctx: &SqlContext, audit: &AuditContext) {
    for column in columns.iter_mut().filter(|c| !c.flags.ignored) {
        if column.flags.is_auto_date() && !ctx.allow_current_timestamp {
            column.value = SqlValue::DateTime(audit.now);
        }
        stamp_role(column, ColumnRole::InsertUser, audit);
    }
}

/// Stamps update audit fields: the update date when the server does not
/// manage it, the updating user and the origin.
pub fn stamp_update(columns: &mut [ColumnDescriptor], ctx: &SqlContext, audit: &AuditContext) {
    for column in columns.iter_mut().filter(|c| !c.flags.ignored) {
        if column.flags.auto_update_date && !ctx.allow_current_timestamp {
            column.value = SqlValue::DateTime(audit.now);
        }
        stamp_role(column, ColumnRole::UpdateUser, audit);
    }
}

fn stamp_role(column: &mut ColumnDescriptor, user_role: ColumnRole, audit: &AuditContext) {
    match column.role {
        ColumnRole::Origin => column.value = SqlValue::Text(audit.origin.clone()),
        role if role == user_role => {
            if let Some(user) = &audit.user {
                column.value = SqlValue::Text(user.clone());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::schema::{ColumnFlags, ColumnType};

    fn columns() -> Vec<ColumnDescriptor> {
        let mut created = ColumnDescriptor::adhoc("Inclusao", ColumnType::Date, SqlValue::Null);
        created.flags = ColumnFlags {
            auto_insert_date: true,
            ..ColumnFlags::NONE
        };
        let mut changed = ColumnDescriptor::adhoc("Alteracao", ColumnType::Date, SqlValue::Null);
        changed.flags = ColumnFlags {
            auto_update_date: true,
            ..ColumnFlags::NONE
        };
        let mut inserted_by = ColumnDescriptor::adhoc("UsuarioInclusao", ColumnType::String, SqlValue::Null);
        inserted_by.role = ColumnRole::InsertUser;
        let mut updated_by = ColumnDescriptor::adhoc("UsuarioAlteracao", ColumnType::String, SqlValue::Null);
        updated_by.role = ColumnRole::UpdateUser;
        let mut origin = ColumnDescriptor::adhoc("Origem", ColumnType::String, SqlValue::Null);
        origin.role = ColumnRole::Origin;
        vec![created, changed, inserted_by, updated_by, origin]
    }

    fn audit() -> AuditContext {
        AuditContext::now(Some(String::from("ana")), "host-1")
    }

    #[test]
    fn test_insert_stamps_dates_user_and_origin() {
        let ctx = SqlContext::new(Dialect::Sqlite);
        let audit = audit();
        let mut cols = columns();
        stamp_insert(&mut cols, &ctx, &audit);

        assert_eq!(cols[0].value, SqlValue::DateTime(audit.now));
        assert_eq!(cols[1].value, SqlValue::DateTime(audit.now));
        assert_eq!(cols[2].value, SqlValue::Text(String::from("ana")));
        assert_eq!(cols[3].value, SqlValue::Null);
        assert_eq!(cols[4].value, SqlValue::Text(String::from("host-1")));
    }

    #[test]
    fn test_update_leaves_insert_fields() {
        let ctx = SqlContext::new(Dialect::Sqlite);
        let mut cols = columns();
        stamp_update(&mut cols, &ctx, &audit());

        assert_eq!(cols[0].value, SqlValue::Null);
        assert!(matches!(cols[1].value, SqlValue::DateTime(_)));
        assert_eq!(cols[2].value, SqlValue::Null);
        assert_eq!(cols[3].value, SqlValue::Text(String::from("ana")));
    }

    #[test]
    fn test_server_managed_dates_are_not_stamped() {
        let ctx = SqlContext::new(Dialect::MySql).with_current_timestamp(true);
        let mut cols = columns();
        stamp_insert(&mut cols, &ctx, &audit());
        assert_eq!(cols[0].value, SqlValue::Null);
        assert_eq!(cols[1].value, SqlValue::Null);
    }
}
