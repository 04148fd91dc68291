/// Declares the action table of one protocol version.
///
/// ```text
/// ocpp_actions! {
///     version = ProtocolVersion::V16, variant = V16;
///     Heartbeat(ChargePoint): HeartbeatRequest => HeartbeatResponse;
///     ...
/// }
/// ```
///
/// Expands to the version's `Request` and `Response` enums, a `descriptors()`
/// function feeding the schema registry, and the `From`/`TryFrom`/`OcppCall`
/// impls that tie each request struct to its response struct.
macro_rules! ocpp_actions {
    (
        version = $version:expr, variant = $variant:ident;
        $( $action:ident ( $initiator:ident ) : $req:ident => $resp:ident ; )+
    ) => {
        /// Every request shape of this protocol version, tagged by action
        #[derive(Debug, Clone, PartialEq)]
        pub enum Request {
            $( $action($req), )+
        }

        /// Every response shape of this protocol version, tagged by action
        #[derive(Debug, Clone, PartialEq)]
        pub enum Response {
            $( $action($resp), )+
        }

        impl Request {
            pub fn action(&self) -> &'static str {
                match self {
                    $( Request::$action(_) => stringify!($action), )+
                }
            }

            pub fn shape(&self) -> &'static str {
                match self {
                    $( Request::$action(_) => stringify!($req), )+
                }
            }

            pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
                match self {
                    $( Request::$action(inner) => serde_json::to_value(inner), )+
                }
            }
        }

        impl Response {
            pub fn action(&self) -> &'static str {
                match self {
                    $( Response::$action(_) => stringify!($action), )+
                }
            }

            pub fn shape(&self) -> &'static str {
                match self {
                    $( Response::$action(_) => stringify!($resp), )+
                }
            }

            pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
                match self {
                    $( Response::$action(inner) => serde_json::to_value(inner), )+
                }
            }
        }

        /// Registry entries for every action of this version
        pub(crate) fn descriptors() -> Vec<$crate::registry::ActionDescriptor> {
            vec![
                $(
                    $crate::registry::ActionDescriptor {
                        action: stringify!($action),
                        version: $version,
                        initiator: $crate::registry::Initiator::$initiator,
                        request: $crate::registry::RequestShape::new(
                            stringify!($req),
                            |payload| {
                                $crate::codec::payload::decode::<$req>(payload).map(|inner| {
                                    $crate::ocpp::OcppRequest::$variant(Request::$action(inner))
                                })
                            },
                        ),
                        response: $crate::registry::ResponseShape::new(
                            stringify!($resp),
                            |payload| {
                                $crate::codec::payload::decode::<$resp>(payload).map(|inner| {
                                    $crate::ocpp::OcppResponse::$variant(Response::$action(inner))
                                })
                            },
                        ),
                    },
                )+
            ]
        }

        $(
            impl From<$req> for $crate::ocpp::OcppRequest {
                fn from(inner: $req) -> Self {
                    $crate::ocpp::OcppRequest::$variant(Request::$action(inner))
                }
            }

            impl TryFrom<$crate::ocpp::OcppRequest> for $req {
                type Error = $crate::ocpp::OcppRequest;

                fn try_from(request: $crate::ocpp::OcppRequest) -> Result<Self, Self::Error> {
                    match request {
                        $crate::ocpp::OcppRequest::$variant(Request::$action(inner)) => Ok(inner),
                        other => Err(other),
                    }
                }
            }

            impl From<$resp> for $crate::ocpp::OcppResponse {
                fn from(inner: $resp) -> Self {
                    $crate::ocpp::OcppResponse::$variant(Response::$action(inner))
                }
            }

            impl TryFrom<$crate::ocpp::OcppResponse> for $resp {
                type Error = $crate::ocpp::OcppResponse;

                fn try_from(response: $crate::ocpp::OcppResponse) -> Result<Self, Self::Error> {
                    match response {
                        $crate::ocpp::OcppResponse::$variant(Response::$action(inner)) => Ok(inner),
                        other => Err(other),
                    }
                }
            }

            impl $crate::ocpp::TypedResponse for $resp {
                fn from_response(response: $crate::ocpp::OcppResponse) -> Result<Self, $crate::ocpp::OcppResponse> {
                    Self::try_from(response)
                }
            }

            impl $crate::ocpp::OcppCall for $req {
                const ACTION: &'static str = stringify!($action);
                const VERSION: $crate::ocpp::ProtocolVersion = $version;
                type Response = $resp;
            }
        )+
    };
}
