//! # Typed Model Wrappers
//!
//! [`define_model!`](crate::define_model) turns a field list into a schema and
//! a thin typed handle around [`Model`](crate::Model): one getter and one
//! `set_<field>` per field, with the schema built once per process.
//!
//! ```rust
//! use sync_framework::define_model;
//!
//! define_model! {
//!     /// A compute flavor.
//!     pub struct Flavor("flavor") {
//!         name: String,
//!         ram: Number = 512,
//!         public: Boolean = true,
//!     }
//! }
//!
//! let flavor = Flavor::new().unwrap();
//! assert_eq!(flavor.ram(), Some(512.0));
//! flavor.set_name(Some("m1.small".to_string())).unwrap();
//! assert_eq!(flavor.name().as_deref(), Some("m1.small"));
//! ```
//!
//! Field kinds are `String`, `Number`, `Boolean` and `Any`. Getters return
//! `None` (or null for `Any`) once the model is disposed.

#[macro_export]
macro_rules! define_model {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ($schema_name:literal) {
            $( $field:ident : $kind:ident $(= $default:expr)? ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name {
            model: $crate::Model,
        }

        impl $name {
            pub const SCHEMA_NAME: &'static str = $schema_name;

            pub fn schema() -> ::std::sync::Arc<$crate::ModelSchema> {
                static SCHEMA: ::std::sync::OnceLock<::std::sync::Arc<$crate::ModelSchema>> =
                    ::std::sync::OnceLock::new();
                SCHEMA
                    .get_or_init(|| {
                        $crate::ModelSchema::builder($schema_name)
                            $( .field($crate::define_model!(@field_spec $kind, stringify!($field) $(, $default)?)) )*
                            .build()
                    })
                    .clone()
            }

            pub fn new() -> ::std::result::Result<Self, $crate::SyncError> {
                Ok(Self { model: $crate::Model::new(Self::schema())? })
            }

            pub fn with_values(
                values: &$crate::__private::serde_json::Value,
            ) -> ::std::result::Result<Self, $crate::SyncError> {
                Ok(Self { model: $crate::Model::with_values(Self::schema(), values)? })
            }

            /// Wraps an existing model of this schema.
            pub fn from_model(model: $crate::Model) -> ::std::result::Result<Self, $crate::SyncError> {
                if model.schema().name() != $schema_name {
                    return Err($crate::SyncError::InvalidInput(format!(
                        "expected a {} model, got {}",
                        $schema_name,
                        model.schema().name()
                    )));
                }
                Ok(Self { model })
            }

            pub fn model(&self) -> &$crate::Model {
                &self.model
            }

            $crate::__private::paste! {
                $(
                    pub fn $field(&self) -> $crate::define_model!(@ty $kind) {
                        $crate::define_model!(@get $kind, self.model.get(stringify!($field)).unwrap_or_default())
                    }

                    pub fn [<set_ $field>](
                        &self,
                        value: $crate::define_model!(@ty $kind),
                    ) -> ::std::result::Result<bool, $crate::SyncError> {
                        self.model.set_value(
                            stringify!($field),
                            $crate::__private::serde_json::json!(value),
                            $crate::Notify::Emit,
                        )
                    }
                )*
            }
        }
    };

    (@field_spec String, $name:expr) => { $crate::FieldSpec::string($name) };
    (@field_spec Number, $name:expr) => { $crate::FieldSpec::number($name) };
    (@field_spec Boolean, $name:expr) => { $crate::FieldSpec::boolean($name) };
    (@field_spec Any, $name:expr) => { $crate::FieldSpec::any($name) };
    (@field_spec $kind:ident, $name:expr, $default:expr) => {
        $crate::define_model!(@field_spec $kind, $name)
            .with_default($crate::__private::serde_json::json!($default))
    };

    (@ty String) => { ::std::option::Option<::std::string::String> };
    (@ty Number) => { ::std::option::Option<f64> };
    (@ty Boolean) => { ::std::option::Option<bool> };
    (@ty Any) => { $crate::__private::serde_json::Value };

    (@get String, $value:expr) => { $value.as_str().map(::std::string::ToString::to_string) };
    (@get Number, $value:expr) => { $value.as_f64() };
    (@get Boolean, $value:expr) => { $value.as_bool() };
    (@get Any, $value:expr) => { $value };
}
