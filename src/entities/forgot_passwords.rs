use sea_orm::entity::prelude::*;

/// Present while a password reset is in progress; deleted on successful
/// reset, on expired-token landing, and when the owning email turns out
/// to be unvalidated.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "forgot_passwords")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i32,

    /// Most recently issued reset token for this user.
    pub reset_token: String,

    pub attempts: i32,

    /// First attempt in the current rolling window.
    pub initial_attempt: String,

    pub last_attempt: Option<String>,

    pub created_at: String,
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
