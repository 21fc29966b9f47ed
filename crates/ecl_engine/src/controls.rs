//! Request control handling.
//!
//! Controls are processed in request order. Each one is first offered to
//! access control; the first refusal ends processing. The cookie exchange
//! control is mandatory.

use crate::access::{AccessControl, ClientContext, Privilege};
use crate::config::EngineConfig;
use crate::directory::DirectoryLookup;
use crate::error::{EngineError, EngineResult};
use crate::matcher::{EntryMatcher, SearchScope};
use ecl_protocol::{ControlKind, Dn, MultiDomainCookie, PersistentChangeType, RequestControl};
use std::collections::BTreeSet;
use tracing::debug;

/// Persistent search parameters from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentRequest {
    /// Change types to report.
    pub change_types: BTreeSet<PersistentChangeType>,
    /// Skip the backlog.
    pub changes_only: bool,
    /// Attach entry change notification controls.
    pub return_ecs: bool,
}

/// Result-shaping flags requested through controls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultFlags {
    /// Return subentries.
    pub return_subentries: bool,
    /// Matched values filters.
    pub matched_values: Vec<String>,
    /// Report account usability.
    pub account_usable: bool,
    /// Return real attributes only.
    pub real_attributes_only: bool,
    /// Return virtual attributes only.
    pub virtual_attributes_only: bool,
}

/// Everything the controls of one request decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSettings {
    /// Starting cookie.
    pub cookie: MultiDomainCookie,
    /// Persistent search parameters, if requested.
    pub persistent: Option<PersistentRequest>,
    /// Effective authorization DN after proxied authorization.
    pub authorization_dn: Option<Dn>,
    /// Result-shaping flags.
    pub flags: ResultFlags,
}

/// Interprets the request controls of one search.
pub struct ControlHandler<'a> {
    config: &'a EngineConfig,
    access: &'a dyn AccessControl,
    directory: &'a dyn DirectoryLookup,
    matcher: &'a dyn EntryMatcher,
    source_bound: bool,
}

impl<'a> ControlHandler<'a> {
    /// Creates a handler.
    pub fn new(
        config: &'a EngineConfig,
        access: &'a dyn AccessControl,
        directory: &'a dyn DirectoryLookup,
        matcher: &'a dyn EntryMatcher,
        source_bound: bool,
    ) -> Self {
        Self {
            config,
            access,
            directory,
            matcher,
            source_bound,
        }
    }

    /// Processes `controls` for a search of `base`.
    pub fn handle(
        &self,
        base: &Dn,
        client: &ClientContext,
        controls: &[RequestControl],
    ) -> EngineResult<RequestSettings> {
        let mut cookie = None;
        let mut persistent = None;
        let mut authorization_dn = None;
        let mut flags = ResultFlags::default();

        for control in controls {
            if !self.access.is_allowed(base, client, control) {
                debug!(oid = control.oid(), "request control refused by access control");
                return Err(EngineError::ControlNotAllowed {
                    oid: control.oid().to_string(),
                });
            }

            match &control.kind {
                ControlKind::CookieExchange { cookie: raw } => {
                    cookie =
                        Some(MultiDomainCookie::decode(raw).map_err(EngineError::MalformedCookie)?);
                }
                ControlKind::Assertion { filter } => self.check_assertion(base, filter)?,
                ControlKind::ProxiedAuthV1 { authz_dn } | ControlKind::ProxiedAuthV2 { authz_dn } => {
                    if !client.has_privilege(Privilege::ProxiedAuth) {
                        return Err(EngineError::AuthorizationDenied(format!(
                            "{} lacks the proxied-auth privilege",
                            client.bind_dn
                        )));
                    }
                    let dn = Dn::parse(authz_dn)
                        .map_err(|e| EngineError::AuthorizationDenied(e.to_string()))?;
                    authorization_dn = Some(dn);
                }
                ControlKind::PersistentSearch {
                    change_types,
                    changes_only,
                    return_ecs,
                } => {
                    persistent = Some(PersistentRequest {
                        change_types: change_types.clone(),
                        changes_only: *changes_only,
                        return_ecs: *return_ecs,
                    });
                }
                ControlKind::Subentries => flags.return_subentries = true,
                ControlKind::MatchedValues { filters } => {
                    flags.matched_values = filters.clone();
                }
                ControlKind::AccountUsable => flags.account_usable = true,
                ControlKind::RealAttrsOnly => flags.real_attributes_only = true,
                ControlKind::VirtualAttrsOnly => flags.virtual_attributes_only = true,
                ControlKind::GetEffectiveRights => {}
                ControlKind::Other { oid } => {
                    if control.critical
                        && !(self.source_bound && self.config.supports_control(oid))
                    {
                        debug!(oid = oid.as_str(), "unsupported critical control");
                        return Err(EngineError::UnavailableCriticalExtension { oid: oid.clone() });
                    }
                }
            }
        }

        let cookie = cookie.ok_or(EngineError::MissingCookie)?;
        Ok(RequestSettings {
            cookie,
            persistent,
            authorization_dn,
            flags,
        })
    }

    fn check_assertion(&self, base: &Dn, filter: &str) -> EngineResult<()> {
        let entry = self
            .directory
            .get_entry(base)
            .map_err(|e| EngineError::CannotEvaluateAssertion(e.to_string()))?
            .ok_or_else(|| {
                EngineError::CannotEvaluateAssertion(format!("entry {base} does not exist"))
            })?;
        let matched = self
            .matcher
            .parse_filter(filter)
            .and_then(|filter| {
                self.matcher
                    .matches(&entry, base, SearchScope::BaseObject, &filter)
            })
            .map_err(|e| EngineError::CannotEvaluateAssertion(e.to_string()))?;
        if matched {
            Ok(())
        } else {
            Err(EngineError::AssertionFailed(base.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AllowAll, DenyControls};
    use crate::directory::MemoryDirectory;
    use crate::matcher::BasicMatcher;
    use ecl_protocol::control::oid;
    use ecl_protocol::{ChangeNumber, ChangelogSchema};

    struct Fixture {
        config: EngineConfig,
        directory: MemoryDirectory,
    }

    impl Fixture {
        fn new() -> Self {
            let config = EngineConfig::default();
            let directory = MemoryDirectory::new().with_entry(ChangelogSchema::default().root_entry());
            Self { config, directory }
        }

        fn handle_with(
            &self,
            access: &dyn AccessControl,
            client: &ClientContext,
            controls: &[RequestControl],
        ) -> EngineResult<RequestSettings> {
            ControlHandler::new(&self.config, access, &self.directory, &BasicMatcher, true).handle(
                self.config.schema.root_dn(),
                client,
                controls,
            )
        }

        fn handle(&self, controls: &[RequestControl]) -> EngineResult<RequestSettings> {
            self.handle_with(&AllowAll, &ClientContext::new(1, 1, 1), controls)
        }
    }

    #[test]
    fn cookie_is_required() {
        let fx = Fixture::new();
        assert_eq!(fx.handle(&[]), Err(EngineError::MissingCookie));
        assert_eq!(
            fx.handle(&[RequestControl::new(ControlKind::Subentries)]),
            Err(EngineError::MissingCookie)
        );
    }

    #[test]
    fn cookie_is_decoded() {
        let fx = Fixture::new();
        let csn = ChangeNumber::new(1000, 5, 1);
        let cookie = MultiDomainCookie::new().advanced("o=test", csn).unwrap();
        let settings = fx.handle(&[RequestControl::cookie(cookie.encode())]).unwrap();
        assert_eq!(settings.cookie, cookie);
        assert!(settings.persistent.is_none());

        let empty = fx.handle(&[RequestControl::cookie("")]).unwrap();
        assert!(empty.cookie.is_empty());
    }

    #[test]
    fn malformed_cookie_is_a_protocol_error() {
        let fx = Fixture::new();
        let err = fx.handle(&[RequestControl::cookie("o=test:nothex;")]).unwrap_err();
        assert!(matches!(err, EngineError::MalformedCookie(_)));
    }

    #[test]
    fn access_denial_stops_processing() {
        let fx = Fixture::new();
        let access = DenyControls::new().deny(oid::SUBENTRIES);
        let err = fx
            .handle_with(
                &access,
                &ClientContext::new(1, 1, 1),
                &[
                    RequestControl::new(ControlKind::Subentries),
                    RequestControl::critical(ControlKind::Other { oid: "9.9.9".into() }),
                ],
            )
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::ControlNotAllowed {
                oid: oid::SUBENTRIES.into()
            }
        );
    }

    #[test]
    fn critical_controls() {
        let fx = Fixture::new();
        let err = fx
            .handle(&[
                RequestControl::cookie(""),
                RequestControl::critical(ControlKind::Other { oid: "9.9.9".into() }),
            ])
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::UnavailableCriticalExtension {
                oid: "9.9.9".into()
            }
        );

        assert!(fx
            .handle(&[
                RequestControl::cookie(""),
                RequestControl::new(ControlKind::Other { oid: "9.9.9".into() }),
                RequestControl::critical(ControlKind::Other { oid: oid::VLV.into() }),
                RequestControl::critical(ControlKind::GetEffectiveRights),
            ])
            .is_ok());
    }

    #[test]
    fn supported_controls_need_a_bound_source() {
        let fx = Fixture::new();
        let handler =
            ControlHandler::new(&fx.config, &AllowAll, &fx.directory, &BasicMatcher, false);
        let err = handler
            .handle(
                fx.config.schema.root_dn(),
                &ClientContext::new(1, 1, 1),
                &[
                    RequestControl::cookie(""),
                    RequestControl::critical(ControlKind::Other {
                        oid: oid::SERVER_SIDE_SORT.into(),
                    }),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::UnavailableCriticalExtension { .. }));
    }

    #[test]
    fn assertion() {
        let fx = Fixture::new();
        let assertion = |filter: &str| {
            RequestControl::new(ControlKind::Assertion {
                filter: filter.into(),
            })
        };

        assert!(fx
            .handle(&[
                RequestControl::cookie(""),
                assertion("(objectClass=changeLogEntry)")
            ])
            .is_ok());
        assert!(matches!(
            fx.handle(&[RequestControl::cookie(""), assertion("(cn=nobody)")]),
            Err(EngineError::AssertionFailed(_))
        ));
        assert!(matches!(
            fx.handle(&[RequestControl::cookie(""), assertion("(cn=")]),
            Err(EngineError::CannotEvaluateAssertion(_))
        ));

        let empty = Fixture {
            config: EngineConfig::default(),
            directory: MemoryDirectory::new(),
        };
        assert!(matches!(
            empty.handle(&[RequestControl::cookie(""), assertion("(objectClass=*)")]),
            Err(EngineError::CannotEvaluateAssertion(_))
        ));
    }

    #[test]
    fn proxied_auth_requires_privilege() {
        let fx = Fixture::new();
        let proxy = RequestControl::new(ControlKind::ProxiedAuthV2 {
            authz_dn: "uid=app,dc=example,dc=com".into(),
        });

        let err = fx
            .handle(&[RequestControl::cookie(""), proxy.clone()])
            .unwrap_err();
        assert!(matches!(err, EngineError::AuthorizationDenied(_)));

        let admin = ClientContext::new(1, 1, 1).with_privilege(Privilege::ProxiedAuth);
        let settings = fx
            .handle_with(&AllowAll, &admin, &[proxy, RequestControl::cookie("")])
            .unwrap();
        assert_eq!(
            settings.authorization_dn,
            Some(Dn::parse("uid=app,dc=example,dc=com").unwrap())
        );

        let anonymous = RequestControl::new(ControlKind::ProxiedAuthV1 {
            authz_dn: String::new(),
        });
        let settings = fx
            .handle_with(&AllowAll, &admin, &[anonymous, RequestControl::cookie("")])
            .unwrap();
        assert_eq!(settings.authorization_dn, Some(Dn::root()));
    }

    #[test]
    fn persistent_search_and_flags() {
        let fx = Fixture::new();
        let settings = fx
            .handle(&[
                RequestControl::new(ControlKind::PersistentSearch {
                    change_types: [PersistentChangeType::Add, PersistentChangeType::Delete]
                        .into_iter()
                        .collect(),
                    changes_only: true,
                    return_ecs: false,
                }),
                RequestControl::new(ControlKind::Subentries),
                RequestControl::new(ControlKind::MatchedValues {
                    filters: vec!["(cn=a)".into()],
                }),
                RequestControl::new(ControlKind::AccountUsable),
                RequestControl::new(ControlKind::RealAttrsOnly),
                RequestControl::new(ControlKind::VirtualAttrsOnly),
                RequestControl::cookie(""),
            ])
            .unwrap();

        let persistent = settings.persistent.unwrap();
        assert!(persistent.changes_only);
        assert_eq!(persistent.change_types.len(), 2);
        assert!(settings.flags.return_subentries);
        assert_eq!(settings.flags.matched_values, vec!["(cn=a)".to_string()]);
        assert!(settings.flags.account_usable);
        assert!(settings.flags.real_attributes_only);
        assert!(settings.flags.virtual_attributes_only);
    }
}
