use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RoomType {
    Kitchen,
    Bedroom,
    LivingRoom,
    Bathroom,
    DiningRoom,
    Closet,
    Hallway,
    Garage,
    Balcony,
    Utility,
    StaircaseRoom,
    Office,
    MeetingRoom,
    OpenOffice,
    BreakRoom,
    Restroom,
    FactoryOffice,
    Warehouse,
}

impl RoomType {
    pub const ALL: [RoomType; 18] = [
        RoomType::Kitchen,
        RoomType::Bedroom,
        RoomType::LivingRoom,
        RoomType::Bathroom,
        RoomType::DiningRoom,
        RoomType::Closet,
        RoomType::Hallway,
        RoomType::Garage,
        RoomType::Balcony,
        RoomType::Utility,
        RoomType::StaircaseRoom,
        RoomType::Office,
        RoomType::MeetingRoom,
        RoomType::OpenOffice,
        RoomType::BreakRoom,
        RoomType::Restroom,
        RoomType::FactoryOffice,
        RoomType::Warehouse,
    ];

    const PRIORITY: [RoomType; 5] = [
        RoomType::Bedroom,
        RoomType::Kitchen,
        RoomType::LivingRoom,
        RoomType::Bathroom,
        RoomType::DiningRoom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kitchen => "Kitchen",
            Self::Bedroom => "Bedroom",
            Self::LivingRoom => "LivingRoom",
            Self::Bathroom => "Bathroom",
            Self::DiningRoom => "DiningRoom",
            Self::Closet => "Closet",
            Self::Hallway => "Hallway",
            Self::Garage => "Garage",
            Self::Balcony => "Balcony",
            Self::Utility => "Utility",
            Self::StaircaseRoom => "StaircaseRoom",
            Self::Office => "Office",
            Self::MeetingRoom => "MeetingRoom",
            Self::OpenOffice => "OpenOffice",
            Self::BreakRoom => "BreakRoom",
            Self::Restroom => "Restroom",
            Self::FactoryOffice => "FactoryOffice",
            Self::Warehouse => "Warehouse",
        }
    }

    /// Case-insensitive lookup by the canonical name, e.g. `livingroom` or `LivingRoom`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|room| room.as_str().eq_ignore_ascii_case(name))
    }

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Kitchen => &["kitchen", "厨房", "cooking", "cook"],
            Self::Bedroom => &["bedroom", "bed", "卧室", "sleep", "sleeping"],
            Self::LivingRoom => &["living room", "livingroom", "lounge", "客厅", "起居室"],
            Self::Bathroom => &["bathroom", "bath", "restroom", "toilet", "卫生间", "浴室"],
            Self::DiningRoom => &["dining room", "diningroom", "dining", "餐厅", "饭厅"],
            Self::Closet => &["closet", "wardrobe", "衣橱", "衣柜"],
            Self::Hallway => &["hallway", "hall", "corridor", "走廊", "过道"],
            Self::Garage => &["garage", "车库"],
            Self::Balcony => &["balcony", "阳台"],
            Self::Utility => &["utility", "utility room", "工具间"],
            Self::StaircaseRoom => &["staircase", "stairs", "楼梯"],
            Self::Office => &["office", "study", "书房", "工作室"],
            Self::MeetingRoom => &["meeting room", "会议室"],
            Self::OpenOffice => &["open office", "openoffice", "开放办公室"],
            Self::BreakRoom => &["break room", "breakroom", "休息室"],
            Self::Restroom => &["restroom", "公共卫生间"],
            Self::FactoryOffice => &["factory office", "工厂办公室"],
            Self::Warehouse => &["warehouse", "仓库"],
        }
    }

    /// Override parameter restricting the solver to this room as the parent room.
    pub fn restrict_override(self) -> String {
        format!(
            "restrict_solving.restrict_parent_rooms=[\"{}\"]",
            self.as_str()
        )
    }

    fn mentioned_in(self, text_lower: &str) -> bool {
        self.keywords()
            .iter()
            .any(|keyword| text_lower.contains(keyword))
    }
}

/// First room type mentioned in `text`, checking the common rooms first.
pub fn detect_room_type(text: &str) -> Option<RoomType> {
    let lowered = text.to_lowercase();
    RoomType::PRIORITY
        .into_iter()
        .chain(
            RoomType::ALL
                .into_iter()
                .filter(|room| !RoomType::PRIORITY.contains(room)),
        )
        .find(|room| room.mentioned_in(lowered.as_str()))
}

pub fn detect_room_types(text: &str) -> Vec<RoomType> {
    let lowered = text.to_lowercase();
    RoomType::ALL
        .into_iter()
        .filter(|room| room.mentioned_in(lowered.as_str()))
        .collect()
}
