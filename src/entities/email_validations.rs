use sea_orm::entity::prelude::*;

/// Present while the owning account's email is unvalidated; deleted on
/// successful validation, so row presence is the source of truth.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "email_validations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i32,

    /// Most recently issued validation token for this user.
    pub validation_token: String,

    /// Transient: only ever true during the commit preceding deletion.
    pub is_validated: bool,

    pub attempts: i32,

    pub created_at: String,

    pub last_attempt: Option<String>,

    pub validated_at: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Users,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
