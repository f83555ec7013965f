// SPDX-FileCopyrightText: 2019-2024 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection pooling and the prepared operations of the store adapter (C2).

pub mod models;
pub mod schema;

use diesel::connection::Connection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::{ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::db::models::*;
use crate::db::schema::*;
use crate::error::{PkiError, Result};

diesel_migrations::embed_migrations!("migrations");

pub type PgPool = Pool<ConnectionManager<diesel::PgConnection>>;
pub type PgPooled = PooledConnection<ConnectionManager<diesel::PgConnection>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    SerializableReadOnly,
    SerializableReadWrite,
}

impl Isolation {
    fn as_sql(self) -> &'static str {
        match self {
            Isolation::SerializableReadOnly => {
                "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE READ ONLY"
            }
            Isolation::SerializableReadWrite => {
                "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE READ WRITE"
            }
        }
    }
}

/// Thin wrapper around a pooled Postgres connection exposing exactly the
/// prepared operations named in the external interfaces.
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub fn connect(database_url: &str) -> Result<Self> {
        let manager = ConnectionManager::<diesel::PgConnection>::new(database_url);
        let pool = Pool::builder()
            .build(manager)
            .map_err(|e| PkiError::Configuration(format!("failed to build connection pool: {e}")))?;
        let conn = pool
            .get()
            .map_err(|e| PkiError::Configuration(format!("failed to check out db connection: {e}")))?;
        embedded_migrations::run(&conn)
            .map_err(|e| PkiError::Configuration(format!("failed to run migrations: {e}")))?;
        Ok(Self { pool })
    }

    /// Check out a pooled connection for a single autocommitted statement.
    /// Anything that must share a snapshot or an open write transaction with
    /// other calls goes through [`Db::transaction`] instead, passing its
    /// `conn` to every method below explicitly.
    pub(crate) fn conn(&self) -> Result<PgPooled> {
        self.pool
            .get()
            .map_err(|e| PkiError::Configuration(format!("failed to check out db connection: {e}")))
    }

    /// Run `f` inside a transaction at the given isolation level, on one
    /// connection checked out for the duration of `f`. Every `Db` method `f`
    /// calls must be passed `conn` explicitly so it runs on that same
    /// connection and observes the same snapshot / writes.
    pub fn transaction<T, F>(&self, isolation: Isolation, f: F) -> Result<T>
    where
        F: FnOnce(&PgConnection) -> Result<T>,
    {
        let conn = self.conn()?;
        conn.transaction::<T, PkiError, _>(|| {
            diesel::sql_query(isolation.as_sql()).execute(&conn)?;
            f(&conn)
        })
    }

    pub fn subject_by_name(&self, conn: &PgConnection, name: &str) -> Result<Option<SubjectRow>> {
        Ok(subjects::table
            .filter(subjects::name.eq(name))
            .first::<SubjectRow>(conn)
            .optional()?)
    }

    pub fn altnames(&self, conn: &PgConnection, subject_id: i32) -> Result<Vec<AltnameRow>> {
        Ok(certificates::table
            .filter(certificates::subject_id.eq(subject_id))
            .load::<AltnameRow>(conn)?)
    }

    pub fn tlsa_prefixes(&self, conn: &PgConnection, subject_id: i32) -> Result<Vec<TlsaPrefixRow>> {
        Ok(tlsa_prefixes::table
            .filter(tlsa_prefixes::subject_id.eq(subject_id))
            .load::<TlsaPrefixRow>(conn)?)
    }

    /// All subject names, for commands that default to operating on every CM.
    pub fn all_subject_names(&self, conn: &PgConnection) -> Result<Vec<String>> {
        Ok(subjects::table.select(subjects::name).order(subjects::name.asc()).load::<String>(conn)?)
    }

    pub fn targets(&self, conn: &PgConnection, subject_id: i32) -> Result<Vec<TargetRow>> {
        Ok(targets::table
            .filter(targets::subject_id.eq(subject_id))
            .load::<TargetRow>(conn)?)
    }

    pub fn disthosts(&self, conn: &PgConnection, target_id: i32) -> Result<Vec<DisthostRow>> {
        Ok(disthosts::table
            .filter(disthosts::target_id.eq(target_id))
            .load::<DisthostRow>(conn)?)
    }

    pub fn jails(&self, conn: &PgConnection, disthost_id: i32) -> Result<Vec<JailRow>> {
        Ok(jails::table
            .filter(jails::disthost_id.eq(disthost_id))
            .load::<JailRow>(conn)?)
    }

    pub fn places(&self, conn: &PgConnection, jail_id: i32) -> Result<Vec<PlaceRow>> {
        Ok(places::table
            .filter(places::jail_id.eq(jail_id))
            .load::<PlaceRow>(conn)?)
    }

    /// CI row ids newest-first.
    pub fn list_instances(&self, conn: &PgConnection, subject_id: i32) -> Result<Vec<i32>> {
        Ok(cert_instances::table
            .filter(cert_instances::subject_id.eq(subject_id))
            .order(cert_instances::id.desc())
            .select(cert_instances::id)
            .load::<i32>(conn)?)
    }

    pub fn load_instance(
        &self,
        conn: &PgConnection,
        ci_row_id: i32,
    ) -> Result<Option<(CertInstanceRow, Vec<CertKeyDataRow>)>> {
        let ci = cert_instances::table
            .find(ci_row_id)
            .first::<CertInstanceRow>(conn)
            .optional()?;
        match ci {
            Some(ci) => {
                let cks = cert_key_data::table
                    .filter(cert_key_data::cert_instance_id.eq(ci.id))
                    .load::<CertKeyDataRow>(conn)?;
                Ok(Some((ci, cks)))
            }
            None => Ok(None),
        }
    }

    pub fn insert_cert_instance(&self, conn: &PgConnection, new: NewCertInstance) -> Result<i32> {
        diesel::insert_into(cert_instances::table)
            .values(&new)
            .execute(conn)?;
        let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>(
            "currval(pg_get_serial_sequence('cert_instances','id'))",
        ))
        .get_result(conn)?;
        Ok(id)
    }

    /// Insert a CA's own self-signed CI: the row's `ca_cert_ci` is set to its
    /// own id via the sequence's `currval` in the same statement.
    pub fn insert_cacert_instance(&self, conn: &PgConnection, mut new: NewCertInstance) -> Result<i32> {
        new.ca_cert_ci = None;
        diesel::insert_into(cert_instances::table)
            .values(&new)
            .execute(conn)?;
        let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>(
            "currval(pg_get_serial_sequence('cert_instances','id'))",
        ))
        .get_result(conn)?;
        diesel::update(cert_instances::table.find(id))
            .set(cert_instances::ca_cert_ci.eq(Some(id)))
            .execute(conn)?;
        Ok(id)
    }

    pub fn update_cert_instance(&self, conn: &PgConnection, id: i32, state: &str) -> Result<()> {
        let n = diesel::update(cert_instances::table.find(id))
            .set(cert_instances::state.eq(state))
            .execute(conn)?;
        if n != 1 {
            return Err(PkiError::PersistenceFailure(format!(
                "update_cert_instance({id}) touched {n} rows"
            )));
        }
        Ok(())
    }

    /// Cascades to CKS rows.
    pub fn delete_cert_instance(&self, conn: &PgConnection, id: i32) -> Result<()> {
        diesel::delete(cert_key_data::table.filter(cert_key_data::cert_instance_id.eq(id)))
            .execute(conn)?;
        diesel::delete(cert_instances::table.find(id)).execute(conn)?;
        Ok(())
    }

    pub fn insert_cert_key_data(&self, conn: &PgConnection, new: NewCertKeyData) -> Result<i32> {
        diesel::insert_into(cert_key_data::table)
            .values(&new)
            .execute(conn)?;
        let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>(
            "currval(pg_get_serial_sequence('cert_key_data','id'))",
        ))
        .get_result(conn)?;
        Ok(id)
    }

    pub fn update_cert_key_data(
        &self,
        conn: &PgConnection,
        id: i32,
        cert_pem: &str,
        key_pem: &str,
        hash: &str,
    ) -> Result<()> {
        diesel::update(cert_key_data::table.find(id))
            .set((
                cert_key_data::cert_pem.eq(cert_pem),
                cert_key_data::key_pem.eq(key_pem),
                cert_key_data::hash.eq(hash),
            ))
            .execute(conn)?;
        Ok(())
    }

    /// Only legal for `cert_type = local` CMs; enforced by the caller in
    /// [`crate::store`], not here.
    pub fn update_authorized_until(
        &self,
        conn: &PgConnection,
        subject_id: i32,
        authorized_until: Option<chrono::NaiveDateTime>,
    ) -> Result<()> {
        diesel::update(subjects::table.find(subject_id))
            .set(subjects::authorized_until.eq(authorized_until))
            .execute(conn)?;
        Ok(())
    }

    /// First CI row whose key store carries `hash`, for the ACME intermediate
    /// dedup cache (a CI is reused across every leaf it has signed).
    pub fn cert_instance_id_by_cks_hash(&self, conn: &PgConnection, hash: &str) -> Result<Option<i32>> {
        Ok(cert_key_data::table
            .filter(cert_key_data::hash.eq(hash))
            .select(cert_key_data::cert_instance_id)
            .first::<i32>(conn)
            .optional()?)
    }

    pub fn fqdn_from_instance_id(&self, conn: &PgConnection, ci_row_id: i32) -> Result<Option<String>> {
        Ok(cert_instances::table
            .inner_join(subjects::table)
            .filter(cert_instances::id.eq(ci_row_id))
            .select(subjects::name)
            .first::<String>(conn)
            .optional()?)
    }
}
