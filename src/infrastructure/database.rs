use crate::entities::{chunk_uploads, file_access_logs, files, processing_jobs};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::time::Duration;
use tracing::info;

pub async fn setup_database(database_url: &str) -> anyhow::Result<DatabaseConnection> {
    info!("📂 Database: {}", database_url);

    let mut opt = ConnectOptions::new(database_url);
    opt.max_connections(50)
        .min_connections(2)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    info!("✅ Database connected");

    create_schema(&db).await?;
    Ok(db)
}

/// Create tables and secondary indexes from the entity definitions if they
/// do not exist yet.
pub async fn create_schema(db: &DatabaseConnection) -> anyhow::Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let tables = vec![
        schema
            .create_table_from_entity(files::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(chunk_uploads::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(processing_jobs::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(file_access_logs::Entity)
            .if_not_exists()
            .to_owned(),
    ];

    for stmt in tables {
        db.execute(builder.build(&stmt)).await?;
    }

    let indexes = schema
        .create_index_from_entity(files::Entity)
        .into_iter()
        .chain(schema.create_index_from_entity(chunk_uploads::Entity))
        .chain(schema.create_index_from_entity(file_access_logs::Entity));

    for mut stmt in indexes {
        let _ = db.execute(builder.build(stmt.if_not_exists())).await;
    }

    Ok(())
}
