#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDateTime;
use multisql_derive::{Entity, SqlEnum};
use multisql_orm::{ConnectionConfig, MemorySink, Repository, Session};
use tempfile::TempDir;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, SqlEnum)]
pub enum Situacao {
    #[default]
    Ativo = 1,
    Inativo = 2,
}

#[derive(Debug, Default, Clone, PartialEq, Entity)]
#[table(name = "Produto")]
pub struct Produto {
    #[column(name = "Id", auto_increment)]
    pub id: i64,
    #[column(name = "Codigo", key)]
    pub codigo: String,
    #[column(name = "Descricao", search)]
    pub descricao: String,
    #[column(name = "Preco", money)]
    pub preco: f64,
    #[column(name = "Situacao", enumeration)]
    pub situacao: Situacao,
    #[column(name = "Inclusao", auto_insert_date)]
    pub inclusao: Option<NaiveDateTime>,
    #[column(name = "Alteracao", auto_update_date)]
    pub alteracao: Option<NaiveDateTime>,
    #[column(name = "Criador", insert_user)]
    pub criador: Option<String>,
    #[column(name = "Origem", origin)]
    pub origem: Option<String>,
    #[column(ignore)]
    pub rascunho: Vec<String>,
}

impl Produto {
    pub fn new(codigo: &str, descricao: &str, preco: f64) -> Self {
        Self {
            codigo: codigo.to_string(),
            descricao: descricao.to_string(),
            preco,
            ..Self::default()
        }
    }
}

/// Keyed by a column that is not unique in the table.
#[derive(Debug, Default, Clone, PartialEq, Entity)]
#[table(name = "Cidade")]
pub struct Cidade {
    #[column(name = "Uf", key)]
    pub uf: String,
    #[column(name = "Nome")]
    pub nome: String,
}

#[derive(Debug, Default, Clone, PartialEq, Entity)]
#[table(name = "Anexo")]
pub struct Anexo {
    #[column(name = "Id", auto_increment)]
    pub id: uuid::Uuid,
    #[column(name = "Nome")]
    pub nome: String,
}

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS Produto (
    Id INTEGER PRIMARY KEY,
    Codigo TEXT COLLATE NOCASE NOT NULL,
    Descricao TEXT COLLATE NOCASE NULL,
    Preco REAL NOT NULL DEFAULT 0,
    Situacao INTEGER NOT NULL DEFAULT 1,
    Inclusao DATETIME NULL,
    Alteracao DATETIME NULL,
    Criador TEXT NULL,
    Origem TEXT NULL,
    UNIQUE (Codigo)
);
CREATE TABLE IF NOT EXISTS Cidade (Uf TEXT NOT NULL, Nome TEXT NULL);
CREATE TABLE IF NOT EXISTS Anexo (Id BLOB NOT NULL, Nome TEXT NULL, UNIQUE (Id));
";

pub fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("loja.db").display())
}

pub fn config(dir: &TempDir) -> ConnectionConfig {
    ConnectionConfig::sqlite(database_url(dir))
        .with_user("ana")
        .with_origin("caixa-01")
}

pub async fn repository<E: multisql_core::Entity>(dir: &TempDir) -> (Repository<E>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let mut repo = Repository::<E>::with_sink(config(dir), sink.clone());
    repo.connections()
        .acquire()
        .await
        .unwrap()
        .execute_raw(SCHEMA)
        .await
        .unwrap();
    (repo, sink)
}
