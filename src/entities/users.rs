use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub username: String,

    /// Stored lower-cased.
    #[sea_orm(unique)]
    pub email: String,

    /// Argon2id password hash
    pub password_hash: String,

    /// One of `user`, `moderator`, `admin`.
    pub role: String,

    pub created_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::email_validations::Entity")]
    EmailValidations,
    #[sea_orm(has_one = "super::forgot_passwords::Entity")]
    ForgotPasswords,
}

impl Related<super::email_validations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmailValidations.def()
    }
}

impl Related<super::forgot_passwords::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ForgotPasswords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
