use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(GraphNodes::Table)
                    .if_not_exists()
                    .col(pk_auto(GraphNodes::NodeId))
                    .col(string(GraphNodes::Label))
                    .col(big_integer_null(GraphNodes::OsmId))
                    .col(double(GraphNodes::Lon))
                    .col(double(GraphNodes::Lat))
                    .col(integer(GraphNodes::Srid))
                    .col(string(GraphNodes::GeomWkt))
                    .col(json(GraphNodes::Properties))
                    .to_owned(),
            )
            .await?;

        // Secondary indexes are owned by the loader's maintenance actions, not by the schema.
        manager
            .create_table(
                Table::create()
                    .table(GraphEdges::Table)
                    .if_not_exists()
                    .col(pk_auto(GraphEdges::EdgeId))
                    .col(string(GraphEdges::RelType))
                    .col(integer(GraphEdges::StartNode))
                    .col(integer(GraphEdges::EndNode))
                    .col(big_integer_null(GraphEdges::OsmId))
                    .col(big_integer(GraphEdges::StartId))
                    .col(big_integer(GraphEdges::EndId))
                    .col(json(GraphEdges::Geom))
                    .col(text(GraphEdges::Way))
                    .col(double(GraphEdges::Length))
                    .col(json(GraphEdges::RefOsmNodes))
                    .col(json(GraphEdges::Properties))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(GraphEdges::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(GraphNodes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum GraphNodes {
    Table,
    NodeId,
    Label,
    OsmId,
    Lon,
    Lat,
    Srid,
    GeomWkt,
    Properties,
}

#[derive(DeriveIden)]
enum GraphEdges {
    Table,
    EdgeId,
    RelType,
    StartNode,
    EndNode,
    OsmId,
    StartId,
    EndId,
    Geom,
    Way,
    Length,
    RefOsmNodes,
    Properties,
}
